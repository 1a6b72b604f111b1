use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::config::PipelineConfig;
use crate::content::ContentModel;
use crate::error::ContentError;
use crate::render::Renderer;
use crate::transform::{NodeTransformer, Scope};
use crate::{Node, TranspileError, TranspileResult, parse};

/// A macro to compile as part of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacroRequest {
    pub site: String,
    pub name: String,
}

impl MacroRequest {
    pub fn new(site: &str, name: &str) -> Self {
        Self {
            site: site.to_string(),
            name: name.to_string(),
        }
    }
}

/// `Transpiler` drives the whole pipeline: parse, rewrite, render.
///
/// It owns the parse cache and is the only component that knows the order
/// of the passes and where macros come from.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use macrojsp::{MemoryContentModel, NullRenderer, Transpiler};
///
/// let transpiler = Transpiler::builder(Arc::new(MemoryContentModel::new()))
///     .renderer(Box::new(NullRenderer))
///     .build();
/// let output = futures::executor::block_on(transpiler.transform("")).unwrap();
/// assert_eq!(output, "");
/// ```
pub struct Transpiler {
    content: Arc<dyn ContentModel>,
    passes: Vec<Box<dyn NodeTransformer>>,
    renderer: Box<dyn Renderer>,
    /// Parsed trees keyed by exact source text.
    cache: RwLock<HashMap<String, Arc<Node>>>,
}

/// Builds a [`Transpiler`]. Without further settings it runs the standard
/// JSP pipeline.
pub struct TranspilerBuilder {
    content: Arc<dyn ContentModel>,
    passes: Option<Vec<Box<dyn NodeTransformer>>>,
    renderer: Option<Box<dyn Renderer>>,
}

impl TranspilerBuilder {
    /// Appends a pass.
    pub fn pass(mut self, pass: Box<dyn NodeTransformer>) -> Self {
        self.passes.get_or_insert_with(Vec::new).push(pass);
        self
    }

    /// Replaces the whole pass list.
    pub fn passes(mut self, passes: Vec<Box<dyn NodeTransformer>>) -> Self {
        self.passes = Some(passes);
        self
    }

    pub fn renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn build(self) -> Transpiler {
        let defaults = PipelineConfig::jsp();
        Transpiler {
            content: self.content,
            passes: self.passes.unwrap_or_else(|| defaults.build_passes()),
            renderer: self.renderer.unwrap_or_else(|| defaults.build_renderer()),
            cache: RwLock::new(HashMap::new()),
        }
    }
}

impl fmt::Debug for Transpiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transpiler")
            .field(
                "passes",
                &self.passes.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("renderer", &self.renderer.name())
            .finish_non_exhaustive()
    }
}

impl Transpiler {
    pub fn builder(content: Arc<dyn ContentModel>) -> TranspilerBuilder {
        TranspilerBuilder {
            content,
            passes: None,
            renderer: None,
        }
    }

    /// Creates a transpiler running the passes and renderer named in `config`.
    ///
    /// # Errors
    ///
    /// * `Err(TranspileError::Config)` if the configuration is inconsistent
    pub fn from_config(
        content: Arc<dyn ContentModel>,
        config: &PipelineConfig,
    ) -> TranspileResult<Self> {
        config.validate()?;
        Ok(Self::builder(content)
            .passes(config.build_passes())
            .renderer(config.build_renderer())
            .build())
    }

    /// Names of the configured passes, in order.
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Parses `source`, reusing the tree of an earlier identical source.
    ///
    /// # Errors
    ///
    /// * `Err(TranspileError::Parse)` if the source contains syntax errors
    pub async fn parse_string(&self, source: &str) -> TranspileResult<Arc<Node>> {
        // Entries are never mutated after insertion.
        if let Some(hit) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
        {
            debug!(bytes = source.len(), "Parse cache hit");
            return Ok(Arc::clone(hit));
        }

        debug!(bytes = source.len(), "Parse cache miss");
        let root = Arc::new(parse(source)?);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.to_string(), Arc::clone(&root));
        Ok(root)
    }

    /// Locates the macro `name` of `site` and returns its `MacroNode`.
    ///
    /// # Errors
    ///
    /// * `Err(TranspileError::MacroNotFound)` if no file of the site defines it
    /// * `Err(TranspileError::Parse)` if the defining file does not parse
    #[instrument(skip(self))]
    pub async fn parse_macro(&self, site: &str, name: &str) -> TranspileResult<Node> {
        let not_found = || TranspileError::MacroNotFound {
            site: site.to_string(),
            name: name.to_string(),
        };

        let source = match self.content.resolve_macro(site, name).await {
            Ok(source) => source,
            Err(ContentError::UnknownMacro { .. }) => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        debug!(entity = %source.entity.id, file = %source.file, "Resolved macro");

        let root = self.parse_string(&source.source).await?;
        let found = match root.as_ref() {
            Node::Macro { name: defined, .. } if defined == name => Some(root.as_ref()),
            Node::NodeList { children } => children
                .iter()
                .find(|child| matches!(child, Node::Macro { name: defined, .. } if defined == name)),
            _ => None,
        };
        found.cloned().ok_or_else(not_found)
    }

    /// Properties of the entity owning macro `name`.
    pub async fn macro_properties(
        &self,
        site: &str,
        name: &str,
    ) -> TranspileResult<Map<String, Value>> {
        let source = self.content.resolve_macro(site, name).await?;
        Ok(self.content.entity_properties(site, &source.entity).await?)
    }

    pub async fn view_model(&self, path: &str) -> TranspileResult<Value> {
        match self.content.view_model(path).await {
            Ok(value) => Ok(value),
            Err(ContentError::UnknownViewModel { path }) => {
                Err(TranspileError::ViewModelNotFound { path })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs every pass in order, each on the output of the previous one.
    /// Passes that need lookups only get them when a `site` is given.
    pub async fn transform_node(&self, root: &Node, site: Option<&str>) -> TranspileResult<Node> {
        let scope = site.map(|site| Scope {
            transpiler: self,
            site,
        });

        let mut current = root.clone();
        for pass in &self.passes {
            debug!(pass = pass.name(), "Applying pass");
            current = pass.transform(&current, scope.as_ref()).await?;
        }
        Ok(current)
    }

    pub fn render_node(&self, root: &Node) -> TranspileResult<String> {
        self.renderer.render(root)
    }

    /// Compiles template source that is not attached to a site.
    ///
    /// # Arguments
    ///
    /// * `source` - The template text
    ///
    /// # Returns
    ///
    /// * `Ok(String)` with the rendered output
    /// * `Err(TranspileError)` from whichever stage failed
    #[instrument(skip_all, fields(bytes = source.len()))]
    pub async fn transform(&self, source: &str) -> TranspileResult<String> {
        let root = self.parse_string(source).await?;
        let transformed = self.transform_node(&root, None).await?;
        self.render_node(&transformed)
    }

    /// Compiles one macro of a site.
    ///
    /// # Arguments
    ///
    /// * `site` - The site whose content model defines the macro
    /// * `name` - The macro name
    ///
    /// # Returns
    ///
    /// * `Ok(String)` with the rendered tag file
    /// * `Err(TranspileError)` from whichever stage failed
    #[instrument(skip(self))]
    pub async fn transform_macro(&self, site: &str, name: &str) -> TranspileResult<String> {
        let root = self.parse_macro(site, name).await?;
        let transformed = self.transform_node(&root, Some(site)).await?;
        let output = self.render_node(&transformed)?;
        info!(bytes = output.len(), "Compiled macro");
        Ok(output)
    }

    /// Compiles many macros concurrently. Results are in request order and a
    /// failure only affects its own entry.
    pub async fn transform_batch(&self, requests: &[MacroRequest]) -> Vec<TranspileResult<String>> {
        let results = join_all(
            requests
                .iter()
                .map(|request| self.transform_macro(&request.site, &request.name)),
        )
        .await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(total = requests.len(), failed, "Compiled batch");
        results
    }
}

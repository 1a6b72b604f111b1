use serde::{Deserialize, Serialize};

use crate::render::{JspOptions, JspRenderer, NullRenderer, Renderer};
use crate::transform::{
    CloneTransformer, ConcatTransformer, EmptyTransformer, InlineTransformer, LoopTransformer,
    NodeTransformer, SelfTransformer, StaticModelTransformer, VariableTransformer,
};
use crate::{TranspileError, TranspileResult};

fn yes() -> bool {
    true
}

fn this() -> String {
    "this".to_string()
}

fn self_name() -> String {
    "self".to_string()
}

/// One pass of the pipeline, tagged by `pass`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pass", rename_all = "kebab-case")]
pub enum PassConfig {
    Clone,
    Concat,
    Decorate {
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        suffix: String,
        /// Names left undecorated.
        #[serde(default)]
        exclude: Vec<String>,
    },
    Empty,
    Loop,
    Inline {
        /// Also inline macros resolved through the content model.
        #[serde(default = "yes")]
        external: bool,
    },
    #[serde(rename = "self")]
    SelfReference {
        #[serde(default = "this")]
        from: String,
        #[serde(default = "self_name")]
        to: String,
    },
    StaticModel,
}

impl PassConfig {
    pub fn build(&self) -> Box<dyn NodeTransformer> {
        match self {
            Self::Clone => Box::new(CloneTransformer),
            Self::Concat => Box::new(ConcatTransformer),
            Self::Decorate {
                prefix,
                suffix,
                exclude,
            } => Box::new(VariableTransformer::excluding(prefix, suffix, exclude.clone())),
            Self::Empty => Box::new(EmptyTransformer),
            Self::Loop => Box::new(LoopTransformer),
            Self::Inline { external: true } => Box::new(InlineTransformer::new()),
            Self::Inline { external: false } => Box::new(InlineTransformer::local_only()),
            Self::SelfReference { from, to } => Box::new(SelfTransformer::new(from, to)),
            Self::StaticModel => Box::new(StaticModelTransformer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RendererConfig {
    Null,
    Jsp(JspOptions),
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::Jsp(JspOptions::default())
    }
}

impl RendererConfig {
    pub fn build(&self) -> Box<dyn Renderer> {
        match self {
            Self::Null => Box::new(NullRenderer),
            Self::Jsp(options) => Box::new(JspRenderer::new(options.clone())),
        }
    }
}

fn default_passes() -> Vec<PassConfig> {
    vec![
        PassConfig::StaticModel,
        PassConfig::Inline { external: true },
        PassConfig::Concat,
        PassConfig::Empty,
        PassConfig::Loop,
        PassConfig::SelfReference {
            from: this(),
            to: self_name(),
        },
    ]
}

/// Which passes run, in order, and how the result is rendered.
///
/// ```
/// use macrojsp::PipelineConfig;
///
/// let config = PipelineConfig::from_json(
///     r#"{"passes": [{"pass": "inline", "external": false}, {"pass": "loop"}], "renderer": {"kind": "null"}}"#,
/// )
/// .unwrap();
/// assert_eq!(config.passes.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_passes")]
    pub passes: Vec<PassConfig>,
    #[serde(default)]
    pub renderer: RendererConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::jsp()
    }
}

impl PipelineConfig {
    /// The standard pipeline: static-model, inline, concat, empty, loop,
    /// self, rendered to JSP.
    pub fn jsp() -> Self {
        Self {
            passes: default_passes(),
            renderer: RendererConfig::default(),
        }
    }

    pub fn from_json(text: &str) -> TranspileResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TranspileResult<()> {
        for pass in &self.passes {
            match pass {
                PassConfig::Decorate { prefix, suffix, .. }
                    if prefix.is_empty() && suffix.is_empty() =>
                {
                    return Err(TranspileError::Config(
                        "the decorate pass needs a prefix or a suffix".to_string(),
                    ));
                }
                PassConfig::SelfReference { from, to } if from.is_empty() || to.is_empty() => {
                    return Err(TranspileError::Config(
                        "the self pass needs non-empty names".to_string(),
                    ));
                }
                _ => {}
            }
        }
        if let RendererConfig::Jsp(options) = &self.renderer {
            if options.tag_prefix.is_empty() {
                return Err(TranspileError::Config(
                    "the JSP renderer needs a tag prefix".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn build_passes(&self) -> Vec<Box<dyn NodeTransformer>> {
        self.passes.iter().map(PassConfig::build).collect()
    }

    pub fn build_renderer(&self) -> Box<dyn Renderer> {
        self.renderer.build()
    }
}

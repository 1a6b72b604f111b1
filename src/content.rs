use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::analyzer::analyze;
use crate::error::ContentError;

pub type ContentResult<T> = Result<T, ContentError>;

/// Identifies the entity (pattern, component, ...) that owns a macro file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub id: String,
    pub category: String,
    pub category_plural: String,
    /// Path of the entity inside its category, `button` or `forms/input`.
    pub path: String,
}

impl EntityRef {
    pub fn new(id: &str, category: &str, category_plural: &str, path: &str) -> Self {
        Self {
            id: id.to_string(),
            category: category.to_string(),
            category_plural: category_plural.to_string(),
            path: path.to_string(),
        }
    }
}

/// Source text of a macro file, with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroSource {
    pub entity: EntityRef,
    /// File stem of the macro file, without extension.
    pub file: String,
    pub source: String,
}

/// The repository of sites, entities and view models the transpiler reads
/// from. Implementations decide where the data lives.
#[async_trait]
pub trait ContentModel: Send + Sync {
    /// Finds the macro file defining `name` within `site`.
    async fn resolve_macro(&self, site: &str, name: &str) -> ContentResult<MacroSource>;

    /// Configured properties of an entity.
    async fn entity_properties(
        &self,
        site: &str,
        entity: &EntityRef,
    ) -> ContentResult<Map<String, Value>>;

    /// A named JSON fixture, `path` as written in templates.
    async fn view_model(&self, path: &str) -> ContentResult<Value>;
}

/// Where a compiled macro is written:
/// `<root>/<site>/<category-plural>/<entity-path>/<macro-file>.<ext>`.
pub fn output_path(
    root: &Path,
    site: &str,
    entity: &EntityRef,
    macro_file: &str,
    extension: &str,
) -> PathBuf {
    let mut path = root.join(site).join(&entity.category_plural);
    path.extend(entity.path.split('/').filter(|segment| !segment.is_empty()));
    path.push(format!("{}.{}", macro_file, extension));
    path
}

/// In-memory [`ContentModel`], for embedding and tests.
///
/// Macros are indexed by the names their source defines, so registering a
/// file containing three macros makes all three resolvable.
#[derive(Debug)]
pub struct MemoryContentModel {
    sites: RwLock<BTreeSet<String>>,
    macros: RwLock<HashMap<(String, String), MacroSource>>,
    properties: RwLock<HashMap<(String, String), Map<String, Value>>>,
    view_models: RwLock<HashMap<String, Value>>,
}

fn lock_error(e: impl std::fmt::Display) -> ContentError {
    ContentError::Other(format!("Lock: {}", e))
}

impl MemoryContentModel {
    pub fn new() -> Self {
        Self {
            sites: RwLock::new(BTreeSet::new()),
            macros: RwLock::new(HashMap::new()),
            properties: RwLock::new(HashMap::new()),
            view_models: RwLock::new(HashMap::new()),
        }
    }

    /// Registers an entity and one of its macro files. Returns the names of
    /// the macros the file defines.
    pub fn add_entity(
        &self,
        site: &str,
        entity: EntityRef,
        file: &str,
        source: &str,
        properties: Map<String, Value>,
    ) -> ContentResult<Vec<String>> {
        let names: Vec<String> = analyze(source).definitions.into_iter().collect();
        debug!(site, entity = %entity.id, file, macros = ?names, "Registering entity");

        self.sites.write().map_err(lock_error)?.insert(site.to_string());
        self.properties
            .write()
            .map_err(lock_error)?
            .insert((site.to_string(), entity.id.clone()), properties);

        let mut macros = self.macros.write().map_err(lock_error)?;
        for name in &names {
            macros.insert(
                (site.to_string(), name.clone()),
                MacroSource {
                    entity: entity.clone(),
                    file: file.to_string(),
                    source: source.to_string(),
                },
            );
        }
        Ok(names)
    }

    pub fn add_view_model(&self, path: &str, value: Value) -> ContentResult<()> {
        self.view_models
            .write()
            .map_err(lock_error)?
            .insert(path.to_string(), value);
        Ok(())
    }
}

impl Default for MemoryContentModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentModel for MemoryContentModel {
    async fn resolve_macro(&self, site: &str, name: &str) -> ContentResult<MacroSource> {
        if !self.sites.read().map_err(lock_error)?.contains(site) {
            return Err(ContentError::UnknownSite {
                site: site.to_string(),
            });
        }
        let macros = self.macros.read().map_err(lock_error)?;
        macros
            .get(&(site.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ContentError::UnknownMacro {
                site: site.to_string(),
                name: name.to_string(),
            })
    }

    async fn entity_properties(
        &self,
        site: &str,
        entity: &EntityRef,
    ) -> ContentResult<Map<String, Value>> {
        let properties = self.properties.read().map_err(lock_error)?;
        properties
            .get(&(site.to_string(), entity.id.clone()))
            .cloned()
            .ok_or_else(|| ContentError::MissingProperties {
                entity: entity.id.clone(),
            })
    }

    async fn view_model(&self, path: &str) -> ContentResult<Value> {
        let view_models = self.view_models.read().map_err(lock_error)?;
        view_models
            .get(path)
            .cloned()
            .ok_or_else(|| ContentError::UnknownViewModel {
                path: path.to_string(),
            })
    }
}

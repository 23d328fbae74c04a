//! Model catalog port.
//!
//! Resolves a model id to its capabilities and the token pools that may
//! serve it.

use crate::settings::ImagineSettings;

/// Capabilities of one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub model_id: String,
    pub is_image: bool,
    /// Token pools tried in order when serving this model.
    pub pool_candidates: Vec<String>,
}

/// Port for model lookup.
#[cfg_attr(test, mockall::automock)]
pub trait ModelCatalog: Send + Sync {
    /// Look up a model by id.
    fn get(&self, model_id: &str) -> Option<ModelInfo>;

    /// Ids of every model that can generate images.
    fn image_models(&self) -> Vec<String>;
}

/// Catalog backed by a fixed model list.
#[derive(Debug, Clone, Default)]
pub struct StaticModelCatalog {
    models: Vec<ModelInfo>,
}

impl StaticModelCatalog {
    /// Create a catalog from an explicit model list.
    pub const fn new(models: Vec<ModelInfo>) -> Self {
        Self { models }
    }

    /// Catalog holding the configured image model.
    pub fn from_settings(settings: &ImagineSettings) -> Self {
        Self::new(vec![ModelInfo {
            model_id: settings.model_id.clone(),
            is_image: true,
            pool_candidates: settings.pool_candidates.clone(),
        }])
    }
}

impl ModelCatalog for StaticModelCatalog {
    fn get(&self, model_id: &str) -> Option<ModelInfo> {
        self.models.iter().find(|m| m.model_id == model_id).cloned()
    }

    fn image_models(&self) -> Vec<String> {
        self.models
            .iter()
            .filter(|m| m.is_image)
            .map(|m| m.model_id.clone())
            .collect()
    }
}

//! Model catalog loaded from `modelConfiguration.json`.
//!
//! The file is a JSON object keyed by model name. Each entry selects the
//! checkpoint, VAE and sampler settings that get written into the
//! workflow graph before submission.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::CoreError;

/// Backend settings for one selectable model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelConfiguration {
    #[serde(rename = "checkpointName")]
    pub checkpoint_name: String,
    pub vae: String,
    pub steps: u32,
    #[serde(default)]
    pub cfg: Option<f64>,
    #[serde(default)]
    pub sampler_name: Option<String>,
    #[serde(rename = "imageWidth")]
    pub image_width: u32,
    #[serde(rename = "imageHeight")]
    pub image_height: u32,
    #[serde(rename = "defaultPositivePrompt", default)]
    pub default_positive_prompt: String,
    #[serde(rename = "defaultNegativePrompt", default)]
    pub default_negative_prompt: String,
}

/// All models known to the service, sorted by name.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: BTreeMap<String, ModelConfiguration>,
}

impl ModelCatalog {
    /// Read and parse the catalog file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Configuration(format!(
                "Model catalog {} could not be read: {e}",
                path.display()
            ))
        })?;
        let catalog = Self::from_json(&raw)?;
        tracing::info!(path = %path.display(), count = catalog.len(), "Loaded model catalog");
        Ok(catalog)
    }

    /// Parse a catalog from its JSON text.
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let models: BTreeMap<String, ModelConfiguration> = serde_json::from_str(raw)
            .map_err(|e| CoreError::Configuration(format!("Invalid model catalog: {e}")))?;
        Ok(Self { models })
    }

    /// Look up a model by exact name.
    pub fn get(&self, name: &str) -> Result<&ModelConfiguration, CoreError> {
        self.models.get(name).ok_or_else(|| CoreError::NotFound {
            entity: "Model configuration",
            name: name.to_string(),
        })
    }

    /// Model names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

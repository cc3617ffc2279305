//! Dispatch core: one generation request from model lookup to public URL.
//!
//! Per request the generator moves through
//! `Submitting -> Streaming -> Saving -> (Composing | Done) -> Closed`,
//! or to `Failed` from any of them. Nothing is retried; the first error
//! is returned as-is.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fate_comfyui::client::ComfyUIClient;
use fate_comfyui::error::ComfyUIError;
use fate_comfyui::tracker::CompletedPrompt;
use fate_core::config::{AppConfig, DEFAULT_MODEL, DEFAULT_STREAM_TIMEOUT_SECS};
use fate_core::models::ModelCatalog;
use fate_core::prompt::GenerationRequest;
use fate_core::workflow::{WorkflowTemplate, OUTPUT_SINK_NODE};

use crate::error::GenerationError;
use crate::grid;
use crate::storage::{blocking, ImageStore};

/// The remote executor a generator talks to.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Submit `workflow` and wait for it to finish within `timeout`.
    async fn run(
        &self,
        workflow: &serde_json::Value,
        timeout: Duration,
    ) -> Result<CompletedPrompt, ComfyUIError>;

    /// Ask the executor to release models and memory. Never fails.
    async fn free_memory(&self);
}

/// [`GenerationBackend`] backed by a ComfyUI server.
///
/// Every run gets a fresh [`ComfyUIClient`], hence a fresh `client_id`
/// and WebSocket.
#[derive(Debug, Clone)]
pub struct ComfyUIBackend {
    address: Option<String>,
}

impl ComfyUIBackend {
    pub fn new(address: Option<String>) -> Self {
        Self { address }
    }
}

#[async_trait]
impl GenerationBackend for ComfyUIBackend {
    async fn run(
        &self,
        workflow: &serde_json::Value,
        timeout: Duration,
    ) -> Result<CompletedPrompt, ComfyUIError> {
        let client = ComfyUIClient::from_address(self.address.as_deref())?;
        client.run_prompt(workflow, timeout).await
    }

    async fn free_memory(&self) {
        match ComfyUIClient::from_address(self.address.as_deref()) {
            Ok(client) => client.free_memory().await,
            Err(e) => tracing::warn!(error = %e, "Skipping memory release"),
        }
    }
}

/// Where the finished request can be viewed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResult {
    /// Exactly one image survived; its public URL.
    Single(String),
    /// Several images survived; the public URL of their composite grid.
    Grid(String),
}

impl GenerationResult {
    pub fn public_path(&self) -> &str {
        match self {
            Self::Single(path) | Self::Grid(path) => path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Submitting,
    Streaming,
    Saving,
    Composing,
    Done,
    Closed,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submitting => "submitting",
            Self::Streaming => "streaming",
            Self::Saving => "saving",
            Self::Composing => "composing",
            Self::Done => "done",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Clone)]
pub struct ImageGenerator {
    backend: Arc<dyn GenerationBackend>,
    catalog: Arc<ModelCatalog>,
    workflow: Arc<WorkflowTemplate>,
    store: ImageStore,
    default_model: String,
    stream_timeout: Duration,
}

impl ImageGenerator {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        catalog: ModelCatalog,
        workflow: WorkflowTemplate,
        store: ImageStore,
    ) -> Self {
        Self {
            backend,
            catalog: Arc::new(catalog),
            workflow: Arc::new(workflow),
            store,
            default_model: DEFAULT_MODEL.to_string(),
            stream_timeout: Duration::from_secs(DEFAULT_STREAM_TIMEOUT_SECS),
        }
    }

    /// Generator talking to the ComfyUI server named in `config`.
    pub fn from_config(
        config: &AppConfig,
        catalog: ModelCatalog,
        workflow: WorkflowTemplate,
    ) -> Self {
        Self::new(
            Arc::new(ComfyUIBackend::new(config.comfyui_address.clone())),
            catalog,
            workflow,
            ImageStore::from_config(config),
        )
        .with_default_model(config.default_model.clone())
        .with_stream_timeout(config.stream_timeout)
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn backend(&self) -> Arc<dyn GenerationBackend> {
        Arc::clone(&self.backend)
    }

    /// Release backend memory. Failures are only logged.
    pub async fn free_memory(&self) {
        self.backend.free_memory().await
    }

    /// Run `request` to completion and return where its result lives.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, GenerationError> {
        let result = self.run(request).await;
        match &result {
            Ok(output) => tracing::info!(
                stage = %Stage::Closed,
                path = output.public_path(),
                "Generation finished",
            ),
            Err(e) => tracing::error!(
                stage = %Stage::Failed,
                kind = ?e.kind(),
                error = %e,
                "Generation failed",
            ),
        }
        result
    }

    async fn run(&self, request: &GenerationRequest) -> Result<GenerationResult, GenerationError> {
        let model_name = request.model_or(&self.default_model);
        tracing::info!(stage = %Stage::Submitting, model = model_name, count = request.count, "Starting generation");

        let model = match self.catalog.get(model_name) {
            Ok(model) => model,
            // A missing default model is a deployment problem, not user input.
            Err(_) if !request.model.is_empty() => {
                return Err(GenerationError::UnknownModel(model_name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        self.store.ensure_configured()?;
        let seed = request.resolve_seed();
        let workflow = self.workflow.build(model, request, seed)?;

        tracing::debug!(stage = %Stage::Streaming, seed, "Submitting workflow");
        let completed = self.backend.run(&workflow, self.stream_timeout).await?;
        let prompt_id = completed.prompt_id;
        let images = completed.outputs.into_images(OUTPUT_SINK_NODE);
        tracing::info!(prompt_id = %prompt_id, received = images.len(), "Images received");

        tracing::debug!(prompt_id = %prompt_id, stage = %Stage::Saving, "Saving images");
        let saved = self.save_all(&prompt_id, images).await;

        match saved.len() {
            0 => Err(GenerationError::EmptyResult),
            1 => {
                let (path, _) = &saved[0];
                tracing::debug!(prompt_id = %prompt_id, stage = %Stage::Done, "Single image");
                Ok(GenerationResult::Single(self.store.public_path(path)?))
            }
            n => {
                tracing::info!(prompt_id = %prompt_id, stage = %Stage::Composing, count = n, "Composing grid");
                let buffers: Vec<Vec<u8>> = saved.into_iter().map(|(_, bytes)| bytes).collect();
                let canvas = blocking(move || grid::compose(&buffers)).await?;
                let path = self.store.save_grid(&prompt_id, canvas).await?;
                tracing::debug!(prompt_id = %prompt_id, stage = %Stage::Done, "Grid saved");
                Ok(GenerationResult::Grid(self.store.public_path(&path)?))
            }
        }
    }

    /// Save images in order as indices `1..=N`, skipping any that fail.
    async fn save_all(&self, prompt_id: &str, images: Vec<Vec<u8>>) -> Vec<(PathBuf, Vec<u8>)> {
        let mut saved = Vec::with_capacity(images.len());
        for (i, bytes) in images.into_iter().enumerate() {
            let index = i as u32 + 1;
            match self.store.save(prompt_id, index, bytes.clone()).await {
                Ok(path) => saved.push((path, bytes)),
                Err(e) => tracing::warn!(
                    prompt_id,
                    index,
                    error = %e,
                    "Skipping image that could not be saved",
                ),
            }
        }
        saved
    }
}

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fate_comfyui::error::ComfyUIError;
use fate_comfyui::tracker::{CompletedPrompt, OutputImages};
use fate_core::models::ModelCatalog;
use fate_core::workflow::{WorkflowTemplate, OUTPUT_SINK_NODE};
use fate_pipeline::generator::{GenerationBackend, ImageGenerator};
use fate_pipeline::storage::ImageStore;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde_json::{json, Value};

pub const DOMAIN: &str = "https://img.example.com/fate";

/// Backend that replays canned results and records what it was sent.
#[derive(Default)]
pub struct FakeBackend {
    results: Mutex<VecDeque<Result<CompletedPrompt, ComfyUIError>>>,
    pub workflows: Mutex<Vec<Value>>,
    pub timeouts: Mutex<Vec<Duration>>,
    pub frees: AtomicUsize,
}

impl FakeBackend {
    pub fn returning(result: Result<CompletedPrompt, ComfyUIError>) -> Arc<Self> {
        let backend = Self::default();
        backend.push(result);
        Arc::new(backend)
    }

    pub fn push(&self, result: Result<CompletedPrompt, ComfyUIError>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub fn runs(&self) -> usize {
        self.workflows.lock().unwrap().len()
    }

    pub fn free_count(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    async fn run(
        &self,
        workflow: &Value,
        timeout: Duration,
    ) -> Result<CompletedPrompt, ComfyUIError> {
        self.workflows.lock().unwrap().push(workflow.clone());
        self.timeouts.lock().unwrap().push(timeout);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ComfyUIError::transport("no scripted result")))
    }

    async fn free_memory(&self) {
        self.frees.fetch_add(1, Ordering::SeqCst);
    }
}

/// A completed prompt whose sink node emitted `images`.
pub fn completed(prompt_id: &str, images: Vec<Vec<u8>>) -> CompletedPrompt {
    let mut outputs = OutputImages::default();
    for image in images {
        outputs.push(OUTPUT_SINK_NODE, image);
    }
    CompletedPrompt {
        prompt_id: prompt_id.to_string(),
        outputs,
    }
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([200, 100, 50, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

pub fn catalog() -> ModelCatalog {
    ModelCatalog::from_json(
        r#"{
            "paSanctuary": {
                "checkpointName": "sanctuary.safetensors",
                "vae": "sdxl_vae.safetensors",
                "steps": 30,
                "imageWidth": 1024,
                "imageHeight": 1024,
                "defaultPositivePrompt": "masterpiece",
                "defaultNegativePrompt": "lowres"
            },
            "epicMode": {
                "checkpointName": "epic.safetensors",
                "vae": "epic_vae.safetensors",
                "steps": 20,
                "imageWidth": 768,
                "imageHeight": 512
            }
        }"#,
    )
    .unwrap()
}

pub fn workflow() -> WorkflowTemplate {
    WorkflowTemplate::from_value(json!({
        "Checkpoint": { "class_type": "CheckpointLoaderSimple", "inputs": { "ckpt_name": "" } },
        "VAELoader": { "class_type": "VAELoader", "inputs": { "vae_name": "" } },
        "KSampler": { "class_type": "KSampler", "inputs": { "seed": 0, "steps": 0, "cfg": 7 } },
        "EmptyLatentImage": { "class_type": "EmptyLatentImage", "inputs": { "width": 0, "height": 0, "batch_size": 1 } },
        "PositivePrompt": { "class_type": "CLIPTextEncode", "inputs": { "text": "" } },
        "NegativePrompt": { "class_type": "CLIPTextEncode", "inputs": { "text": "" } },
        "SaveImageWebsocket": { "class_type": "SaveImageWebsocket", "inputs": {} }
    }))
    .unwrap()
}

pub fn generator(backend: Arc<FakeBackend>, folder: &Path) -> ImageGenerator {
    ImageGenerator::new(
        backend,
        catalog(),
        workflow(),
        ImageStore::new(Some(folder.to_path_buf()), Some(DOMAIN.to_string())),
    )
}

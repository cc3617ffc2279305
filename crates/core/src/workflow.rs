//! Workflow graph templating.
//!
//! The template is a ComfyUI API-format graph whose nodes are keyed by
//! readable names (`KSampler`, `Checkpoint`, ...). [`WorkflowTemplate::build`]
//! clones it and writes the model settings and request parameters into
//! the relevant node inputs.

use std::path::Path;

use serde_json::{json, Value};

use crate::error::CoreError;
use crate::models::ModelConfiguration;
use crate::prompt::GenerationRequest;

/// Node whose output frames carry the final image bytes.
pub const OUTPUT_SINK_NODE: &str = "SaveImageWebsocket";

pub const NODE_CHECKPOINT: &str = "Checkpoint";
pub const NODE_VAE_LOADER: &str = "VAELoader";
pub const NODE_SAMPLER: &str = "KSampler";
pub const NODE_LATENT: &str = "EmptyLatentImage";
pub const NODE_POSITIVE: &str = "PositivePrompt";
pub const NODE_NEGATIVE: &str = "NegativePrompt";

/// Terms always added to the negative prompt.
const BASELINE_NEGATIVE: &str = "nsfw, nude";

/// A parsed workflow graph ready to be filled in per request.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    graph: Value,
}

impl WorkflowTemplate {
    /// Read and parse the template file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Configuration(format!("Workflow {} could not be read: {e}", path.display()))
        })?;
        Self::from_json(&raw).map_err(|e| match e {
            CoreError::Validation(msg) => {
                CoreError::Configuration(format!("Workflow {}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Parse a template from its JSON text.
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let graph: Value = serde_json::from_str(raw)
            .map_err(|e| CoreError::Validation(format!("Invalid workflow JSON: {e}")))?;
        Self::from_value(graph)
    }

    pub fn from_value(graph: Value) -> Result<Self, CoreError> {
        if !graph.is_object() {
            return Err(CoreError::Validation("Workflow must be a JSON object".into()));
        }
        if graph.get(OUTPUT_SINK_NODE).is_none() {
            return Err(CoreError::Validation(format!(
                "Workflow has no {OUTPUT_SINK_NODE} node"
            )));
        }
        Ok(Self { graph })
    }

    /// Produce the graph to submit for `request` using `model` settings.
    pub fn build(
        &self,
        model: &ModelConfiguration,
        request: &GenerationRequest,
        seed: u64,
    ) -> Result<Value, CoreError> {
        let mut graph = self.graph.clone();

        set_input(&mut graph, NODE_CHECKPOINT, "ckpt_name", json!(model.checkpoint_name))?;
        set_input(&mut graph, NODE_VAE_LOADER, "vae_name", json!(model.vae))?;

        set_input(&mut graph, NODE_SAMPLER, "steps", json!(model.steps))?;
        set_input(&mut graph, NODE_SAMPLER, "seed", json!(seed))?;
        if let Some(cfg) = model.cfg {
            set_input(&mut graph, NODE_SAMPLER, "cfg", json!(cfg))?;
        }
        if let Some(sampler) = &model.sampler_name {
            set_input(&mut graph, NODE_SAMPLER, "sampler_name", json!(sampler))?;
        }

        let width = request.width.unwrap_or(model.image_width);
        let height = request.height.unwrap_or(model.image_height);
        set_input(&mut graph, NODE_LATENT, "width", json!(width))?;
        set_input(&mut graph, NODE_LATENT, "height", json!(height))?;
        set_input(&mut graph, NODE_LATENT, "batch_size", json!(request.count))?;

        let positive = join_prompt(&[&model.default_positive_prompt, &request.prompt]);
        let negative = join_prompt(&[
            BASELINE_NEGATIVE,
            &model.default_negative_prompt,
            &request.negative_prompt,
        ]);
        set_input(&mut graph, NODE_POSITIVE, "text", json!(positive))?;
        set_input(&mut graph, NODE_NEGATIVE, "text", json!(negative))?;

        Ok(graph)
    }
}

fn set_input(graph: &mut Value, node: &str, input: &str, value: Value) -> Result<(), CoreError> {
    let inputs = graph
        .get_mut(node)
        .and_then(|n| n.get_mut("inputs"))
        .and_then(Value::as_object_mut)
        .ok_or_else(|| CoreError::Validation(format!("Workflow node {node} has no inputs")))?;
    inputs.insert(input.to_string(), value);
    Ok(())
}

fn join_prompt(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

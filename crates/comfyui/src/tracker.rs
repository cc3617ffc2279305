//! Per-prompt execution state machine.
//!
//! [`ExecutionTracker`] consumes frames in arrival order for one prompt,
//! keeps the "current node" cursor, and collects image bytes emitted
//! while that cursor sits on the output-sink node.

use fate_core::workflow::OUTPUT_SINK_NODE;
use indexmap::IndexMap;

use crate::error::ComfyUIError;
use crate::messages::{decode_frame, is_json_frame, StreamEvent};

/// Raw image buffers grouped by the node that emitted them.
///
/// Keys keep first-arrival order; each list keeps arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputImages {
    by_node: IndexMap<String, Vec<Vec<u8>>>,
}

impl OutputImages {
    pub fn push(&mut self, node: &str, bytes: Vec<u8>) {
        self.by_node.entry(node.to_string()).or_default().push(bytes);
    }

    /// Images emitted by `node`, empty if it produced none.
    pub fn images(&self, node: &str) -> &[Vec<u8>] {
        self.by_node.get(node).map(Vec::as_slice).unwrap_or_default()
    }

    /// Take ownership of the images emitted by `node`.
    pub fn into_images(mut self, node: &str) -> Vec<Vec<u8>> {
        self.by_node.shift_remove(node).unwrap_or_default()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.by_node.keys().map(String::as_str)
    }

    /// Total number of images across all nodes.
    pub fn count(&self) -> usize {
        self.by_node.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

/// A finished prompt and everything it emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedPrompt {
    pub prompt_id: String,
    pub outputs: OutputImages,
}

/// Whether the tracked prompt has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerStatus {
    Running,
    Complete,
}

/// Follows one prompt through its `executing` transitions.
#[derive(Debug)]
pub struct ExecutionTracker {
    prompt_id: String,
    current_node: Option<String>,
    outputs: OutputImages,
    status: TrackerStatus,
}

impl ExecutionTracker {
    pub fn new(prompt_id: impl Into<String>) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            current_node: None,
            outputs: OutputImages::default(),
            status: TrackerStatus::Running,
        }
    }

    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    pub fn current_node(&self) -> Option<&str> {
        self.current_node.as_deref()
    }

    pub fn status(&self) -> TrackerStatus {
        self.status
    }

    pub fn outputs(&self) -> &OutputImages {
        &self.outputs
    }

    pub fn into_completed(self) -> CompletedPrompt {
        CompletedPrompt {
            prompt_id: self.prompt_id,
            outputs: self.outputs,
        }
    }

    /// Decode and apply one raw frame.
    ///
    /// Binary frames are dropped without decoding unless the cursor is on
    /// the output sink.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<TrackerStatus, ComfyUIError> {
        if self.status == TrackerStatus::Complete {
            return Ok(self.status);
        }
        if !is_json_frame(frame) && self.current_node() != Some(OUTPUT_SINK_NODE) {
            tracing::trace!(
                prompt_id = %self.prompt_id,
                len = frame.len(),
                "Discarding binary frame outside output node",
            );
            return Ok(self.status);
        }
        let event = decode_frame(frame)?;
        self.apply(event)
    }

    /// Apply one decoded event.
    pub fn apply(&mut self, event: StreamEvent) -> Result<TrackerStatus, ComfyUIError> {
        if self.status == TrackerStatus::Complete {
            return Ok(self.status);
        }

        match event {
            StreamEvent::Progress { prompt_id, node } if prompt_id == self.prompt_id => {
                match node {
                    None => {
                        tracing::info!(
                            prompt_id = %self.prompt_id,
                            images = self.outputs.count(),
                            "Execution completed",
                        );
                        self.status = TrackerStatus::Complete;
                    }
                    Some(node) => {
                        tracing::debug!(prompt_id = %self.prompt_id, node = %node, "Executing node");
                        self.current_node = Some(node);
                    }
                }
            }
            StreamEvent::Progress { .. } => {}
            StreamEvent::ImageChunk { bytes } => {
                if self.current_node() == Some(OUTPUT_SINK_NODE) {
                    tracing::debug!(prompt_id = %self.prompt_id, len = bytes.len(), "Received image");
                    self.outputs.push(OUTPUT_SINK_NODE, bytes);
                }
            }
            StreamEvent::ExecutionError {
                prompt_id,
                node_id,
                message,
            } if prompt_id == self.prompt_id => {
                tracing::error!(
                    prompt_id = %self.prompt_id,
                    node_id = %node_id,
                    error_message = %message,
                    "Execution error",
                );
                return Err(ComfyUIError::Execution { node_id, message });
            }
            StreamEvent::ExecutionError { .. } => {}
            StreamEvent::Step { value, max } => {
                tracing::debug!(prompt_id = %self.prompt_id, value, max, "Generation progress");
            }
            StreamEvent::Other { kind } => {
                tracing::trace!(prompt_id = %self.prompt_id, kind = %kind, "Ignoring message");
            }
        }

        Ok(self.status)
    }
}

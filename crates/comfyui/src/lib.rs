//! ComfyUI WebSocket and REST client library.
//!
//! Submits a workflow over HTTP, follows its execution over a per-client
//! WebSocket, and collects the raw image bytes the output-sink node
//! streams back as binary frames.

pub mod api;
pub mod client;
pub mod error;
pub mod messages;
pub mod tracker;

//! Pure domain logic for the FateBot image-generation service.
//!
//! Everything here is free of network I/O: configuration loading, the
//! model catalog, prompt parsing, workflow templating, and the file
//! naming / public-path conventions shared by the pipeline.

pub mod config;
pub mod error;
pub mod models;
pub mod naming;
pub mod prompt;
pub mod workflow;

//! Chat-facing side of the image worker.
//!
//! [`commands::CommandHandler`] turns incoming chat lines into queue
//! jobs and replies; the binary feeds it from stdin.

pub mod commands;

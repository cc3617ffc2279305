//! Generation pipeline: the serial job queue, image storage and grid
//! composition, and the dispatch core that ties a request to the
//! ComfyUI protocol client.

pub mod error;
pub mod generator;
pub mod grid;
pub mod inactivity;
pub mod queue;
pub mod storage;

//! Domain services operating on ports.

pub mod coder_registry;
pub mod scaling;

pub use coder_registry::{CoderRegistry, collect_frames};

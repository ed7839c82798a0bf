//! capture-stage - Live video capture source for media pipelines
//!
//! This crate provides a capture stage that opens a device through a
//! pluggable backend, negotiates formats and buffers with a downstream
//! consumer, and pushes frames to it from a dedicated acquisition thread.

pub mod config;
pub mod error;
pub mod logging;
pub mod video;

pub use config::{PoolConfig, StageConfig};
pub use error::{CaptureError, Result};
pub use logging::{init_logging, LogLevel};
pub use video::{CaptureStage, MediaFilter, StreamConfig, StreamState, VideoProcAmp};

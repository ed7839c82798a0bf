//! Process-wide capture backend loading
//!
//! The backend is loaded lazily, at most once per registry. A failed load
//! is remembered: later callers get `BackendUnavailable` without the loader
//! running again.

use std::sync::{Arc, OnceLock};
use tracing::{error, info};

use super::device::CaptureDevice;
use crate::error::{CaptureError, Result};

/// Factory for capture devices, supplied by the host environment
pub trait CaptureBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Open the device with the given index
    fn create(&self, index: u32) -> Option<Box<dyn CaptureDevice>>;
}

/// Init-once slot holding the loaded backend
pub struct BackendRegistry {
    slot: OnceLock<Option<Arc<dyn CaptureBackend>>>,
}

impl BackendRegistry {
    pub const fn new() -> Self {
        Self {
            slot: OnceLock::new(),
        }
    }

    /// Registry shared by the whole process
    pub fn process() -> &'static BackendRegistry {
        static PROCESS: BackendRegistry = BackendRegistry::new();
        &PROCESS
    }

    /// Return the backend, running `load` if nothing has been loaded yet
    ///
    /// Concurrent first callers block until the single load finishes.
    pub fn get_or_load<F>(&self, load: F) -> Result<Arc<dyn CaptureBackend>>
    where
        F: FnOnce() -> Option<Arc<dyn CaptureBackend>>,
    {
        self.slot
            .get_or_init(|| {
                let backend = load();
                match &backend {
                    Some(b) => info!("Loaded capture backend: {}", b.name()),
                    None => error!("Failed to load capture backend"),
                }
                backend
            })
            .clone()
            .ok_or(CaptureError::BackendUnavailable)
    }

    /// The loaded backend, if a load has succeeded
    pub fn get(&self) -> Option<Arc<dyn CaptureBackend>> {
        self.slot.get().and_then(|b| b.clone())
    }

    /// Whether a load has been attempted
    pub fn is_loaded(&self) -> bool {
        self.slot.get().is_some()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

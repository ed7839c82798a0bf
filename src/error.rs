use thiserror::Error;

use crate::video::stage::StreamState;

/// Capture stage error type
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Operation requires the stage to be stopped")]
    NotStopped,

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: StreamState,
    },

    #[error("No format supplied")]
    NullFormat,

    #[error("Format is not a video format")]
    NotVideo,

    #[error("Output port is not connected")]
    NotConnected,

    #[error("Output port is already connected")]
    AlreadyConnected,

    #[error("Capture device is already initialized")]
    AlreadyInitialized,

    #[error("Capture device is not initialized")]
    NotInitialized,

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Buffer pool is not committed")]
    NotCommitted,

    #[error("Buffer pool is already committed")]
    AlreadyCommitted,

    #[error("Buffer too small: {required} bytes required, {available} available")]
    BufferTooSmall { required: usize, available: usize },

    #[error("Capture backend is unavailable")]
    BackendUnavailable,

    #[error("Failed to open capture device {0}")]
    DeviceOpen(u32),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Device failed to read a frame")]
    ReadFailed,

    #[error("Format rejected by downstream peer")]
    PeerRejected,

    #[error("Downstream peer is gone")]
    PeerGone,

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Property {0} is not supported")]
    PropertyUnsupported(i32),

    #[error("Property set is not supported")]
    PropertySetUnsupported,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CaptureError {
    /// Whether the failure came from the downstream peer refusing a format,
    /// as opposed to the backend refusing it
    pub fn is_peer_rejection(&self) -> bool {
        matches!(self, CaptureError::PeerRejected)
    }

    /// Whether the failure is a lifecycle precondition violation
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            CaptureError::NotStopped
                | CaptureError::InvalidState { .. }
                | CaptureError::NullFormat
                | CaptureError::NotVideo
                | CaptureError::NotConnected
                | CaptureError::AlreadyConnected
                | CaptureError::AlreadyInitialized
                | CaptureError::NotInitialized
        )
    }
}

/// Result type alias for capture stage operations
pub type Result<T> = std::result::Result<T, CaptureError>;

//! Video capture stage
//!
//! This module provides the capture device contract, buffer pool
//! negotiation, the output port and the streaming state machine.

pub mod acquisition;
pub mod backend;
pub mod device;
pub mod format;
pub mod pool;
pub mod port;
pub mod properties;
pub mod stage;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use acquisition::{AcquisitionExit, AcquisitionSnapshot};
pub use backend::{BackendRegistry, CaptureBackend};
pub use device::{CaptureDevice, DeviceHandle};
pub use format::{CapabilityRange, FormatDescriptor, MediaKind, PixelFormat, Resolution};
pub use pool::{AllocatorProperties, BufferPoolRequest, FramePool, MediaSample, MemAllocator};
pub use port::{InputPin, OutputPort, PinCategory, PinInfo};
pub use properties::{PropertyFlags, PropertyRange, PropertyValue, VideoProcAmpProperty};
pub use stage::{CaptureStage, MiscFlags, ReadyState, StreamState};
pub use traits::{MediaFilter, StreamConfig, VideoProcAmp};

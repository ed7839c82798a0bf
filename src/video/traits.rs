//! Capability traits the capture stage exposes to its controller

use super::format::{CapabilityRange, FormatDescriptor};
use super::properties::{PropertyFlags, PropertyRange, PropertyValue, VideoProcAmpProperty};
use super::stage::{ReadyState, StreamState};
use crate::error::Result;

/// Streaming lifecycle driven by the controller
pub trait MediaFilter {
    /// Current lifecycle state
    fn state(&self) -> StreamState;

    /// Stopped -> Paused: commit buffers and start the acquisition thread
    fn prepare(&self) -> Result<()>;

    /// -> Running: let the acquisition thread produce frames
    fn run(&self) -> Result<()>;

    /// Running -> Paused: park the acquisition thread
    fn pause(&self) -> Result<()>;

    /// Any -> Stopped: stop and join the acquisition thread, release buffers
    fn cleanup(&self) -> Result<()>;

    /// Immediate readiness verdict; never blocks
    fn query_ready(&self) -> ReadyState;
}

/// Format queries and changes
pub trait StreamConfig {
    /// Negotiated format when connected, otherwise the device's current one
    fn get_format(&self) -> Result<FormatDescriptor>;

    /// Change the capture format; only allowed while stopped
    fn set_format(&self, format: Option<&FormatDescriptor>) -> Result<()>;

    /// Number of catalogue entries and the size of one capability record
    fn number_of_capabilities(&self) -> Result<(usize, usize)>;

    /// Catalogue entry at `index`; `None` once `index` reaches the count
    fn stream_caps(&self, index: usize) -> Result<Option<(FormatDescriptor, CapabilityRange)>>;
}

/// Image controls, delegated to the device
pub trait VideoProcAmp {
    fn get_range(&self, property: VideoProcAmpProperty) -> Result<PropertyRange>;

    fn set(&self, property: VideoProcAmpProperty, value: i32, flags: PropertyFlags) -> Result<()>;

    fn get(&self, property: VideoProcAmpProperty) -> Result<PropertyValue>;
}

//! Capture device contract and the owned device handle

use tracing::{debug, info, warn};

use super::backend::CaptureBackend;
use super::format::{CapabilityRange, FormatDescriptor};
use super::properties::{PropertyFlags, PropertyRange, PropertyValue, VideoProcAmpProperty};
use crate::error::{CaptureError, Result};

/// Operations a capture backend provides for one opened device
///
/// Calls are serialized by the stage; implementations never see two
/// concurrent calls on the same device.
pub trait CaptureDevice: Send {
    /// Fill `buffer` with one frame. Returns false on failure.
    fn read_frame(&mut self, buffer: &mut [u8]) -> bool;

    /// Apply a new capture format
    fn set_format(&mut self, format: &FormatDescriptor) -> Result<()>;

    /// Current capture format
    fn get_format(&self) -> FormatDescriptor;

    /// Number of entries in the capability catalogue
    fn caps_count(&self) -> usize;

    /// Catalogue entry at `index`, for `index < caps_count()`
    fn caps(&self, index: usize) -> Option<(FormatDescriptor, CapabilityRange)>;

    /// Whether the device can produce `format`
    fn check_format(&self, format: &FormatDescriptor) -> bool;

    /// Preferred media type at `index`, `None` past the end
    fn media_type(&self, index: usize) -> Option<FormatDescriptor>;

    fn get_prop(&self, property: VideoProcAmpProperty) -> Result<PropertyValue>;

    fn set_prop(
        &mut self,
        property: VideoProcAmpProperty,
        value: i32,
        flags: PropertyFlags,
    ) -> Result<()>;

    fn prop_range(&self, property: VideoProcAmpProperty) -> Result<PropertyRange>;
}

/// Exclusively owned handle to an opened capture device
///
/// Dropping the handle destroys the device.
pub struct DeviceHandle {
    index: u32,
    backend: &'static str,
    device: Box<dyn CaptureDevice>,
}

impl DeviceHandle {
    /// Open device `index` through `backend`
    pub fn open(backend: &dyn CaptureBackend, index: u32) -> Result<Self> {
        debug!("Opening capture device {} via {}", index, backend.name());

        let device = backend.create(index).ok_or_else(|| {
            warn!("Backend {} failed to create device {}", backend.name(), index);
            CaptureError::DeviceOpen(index)
        })?;

        info!("Opened capture device {} ({})", index, backend.name());
        Ok(Self {
            index,
            backend: backend.name(),
            device,
        })
    }

    /// Device index this handle was opened with
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn read_frame(&mut self, buffer: &mut [u8]) -> bool {
        self.device.read_frame(buffer)
    }

    pub fn set_format(&mut self, format: &FormatDescriptor) -> Result<()> {
        self.device.set_format(format).map_err(|e| {
            warn!("Device {} refused format {}: {}", self.index, format, e);
            e
        })
    }

    pub fn get_format(&self) -> FormatDescriptor {
        self.device.get_format()
    }

    pub fn caps_count(&self) -> usize {
        self.device.caps_count()
    }

    pub fn caps(&self, index: usize) -> Result<(FormatDescriptor, CapabilityRange)> {
        self.device.caps(index).ok_or_else(|| {
            CaptureError::Backend(format!(
                "Device {} has no capability entry {}",
                self.index, index
            ))
        })
    }

    pub fn check_format(&self, format: &FormatDescriptor) -> bool {
        self.device.check_format(format)
    }

    pub fn media_type(&self, index: usize) -> Option<FormatDescriptor> {
        self.device.media_type(index)
    }

    pub fn get_prop(&self, property: VideoProcAmpProperty) -> Result<PropertyValue> {
        self.device.get_prop(property)
    }

    pub fn set_prop(
        &mut self,
        property: VideoProcAmpProperty,
        value: i32,
        flags: PropertyFlags,
    ) -> Result<()> {
        self.device.set_prop(property, value, flags)
    }

    pub fn prop_range(&self, property: VideoProcAmpProperty) -> Result<PropertyRange> {
        self.device.prop_range(property)
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        debug!("Destroying capture device {} ({})", self.index, self.backend);
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("index", &self.index)
            .field("backend", &self.backend)
            .finish()
    }
}

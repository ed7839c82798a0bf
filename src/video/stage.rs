//! Capture stage: lifecycle state machine and format negotiation
//!
//! The stage owns the device handle, the output port and the acquisition
//! thread. Controller calls are serialized by one filter lock; the stream
//! state shared with the acquisition thread lives in a separate
//! mutex/condvar pair so the thread never needs the filter lock.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::acquisition::{AcquisitionContext, AcquisitionSnapshot, AcquisitionStats, AcquisitionWorker};
use super::backend::{BackendRegistry, CaptureBackend};
use super::device::DeviceHandle;
use super::format::{CapabilityRange, FormatDescriptor, CAPABILITY_RECORD_SIZE};
use super::pool::{BufferPoolRequest, FramePool, MemAllocator};
use super::port::{InputPin, OutputPort, PinCategory, PinInfo};
use super::properties::{PropertyFlags, PropertyRange, PropertyValue, VideoProcAmpProperty};
use super::traits::{MediaFilter, StreamConfig, VideoProcAmp};
use crate::config::StageConfig;
use crate::error::{CaptureError, Result};

/// Streaming state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Stopped,
    Paused,
    Running,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Stopped => "stopped",
            StreamState::Paused => "paused",
            StreamState::Running => "running",
        };
        write!(f, "{}", name)
    }
}

/// Answer to a readiness query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    Ready,
    /// Paused live source: no data can be cued
    CantCue,
}

/// Miscellaneous filter characteristics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiscFlags(pub u32);

impl MiscFlags {
    pub const IS_RENDERER: MiscFlags = MiscFlags(0x1);
    pub const IS_SOURCE: MiscFlags = MiscFlags(0x2);

    pub fn contains(&self, other: MiscFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Stream state shared with the acquisition thread
///
/// Every transition notifies the condvar.
pub(crate) struct StateCell {
    state: Mutex<StreamState>,
    changed: Condvar,
    #[cfg(test)]
    pub(crate) in_transition: std::sync::atomic::AtomicBool,
}

impl StateCell {
    fn new() -> Self {
        Self {
            state: Mutex::new(StreamState::Stopped),
            changed: Condvar::new(),
            #[cfg(test)]
            in_transition: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub(crate) fn get(&self) -> StreamState {
        *self.state.lock()
    }

    fn set(&self, new: StreamState) {
        let mut state = self.state.lock();
        if *state != new {
            debug!("Stream state {} -> {}", *state, new);
        }
        *state = new;
        self.changed.notify_all();
    }

    /// Block while paused, then report the state that ended the wait
    pub(crate) fn wait_while_paused(&self) -> StreamState {
        let mut state = self.state.lock();
        while *state == StreamState::Paused {
            self.changed.wait(&mut state);
        }
        *state
    }
}

/// Everything guarded by the filter lock
struct StageInner {
    device: Option<Arc<Mutex<DeviceHandle>>>,
    port: OutputPort,
    worker: Option<AcquisitionWorker>,
    /// Allocator committed by the last prepare
    committed: Option<Arc<dyn MemAllocator>>,
}

/// Video capture pipeline stage
pub struct CaptureStage {
    config: StageConfig,
    backend: Arc<dyn CaptureBackend>,
    inner: Mutex<StageInner>,
    state: Arc<StateCell>,
    stats: Arc<AcquisitionStats>,
}

impl CaptureStage {
    /// Create a stage with no device bound
    pub fn new(backend: Arc<dyn CaptureBackend>, config: StageConfig) -> Self {
        Self {
            config,
            backend,
            inner: Mutex::new(StageInner {
                device: None,
                port: OutputPort::new(),
                worker: None,
                committed: None,
            }),
            state: Arc::new(StateCell::new()),
            stats: Arc::new(AcquisitionStats::default()),
        }
    }

    /// Create a stage using the backend held by `registry`, loading it first if needed
    pub fn from_registry<F>(registry: &BackendRegistry, load: F, config: StageConfig) -> Result<Self>
    where
        F: FnOnce() -> Option<Arc<dyn CaptureBackend>>,
    {
        let backend = registry.get_or_load(load)?;
        Ok(Self::new(backend, config))
    }

    /// Get config
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Bind the device with the given index
    pub fn initialize(&self, index: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.device.is_some() {
            return Err(CaptureError::AlreadyInitialized);
        }
        let handle = DeviceHandle::open(self.backend.as_ref(), index)?;
        inner.device = Some(Arc::new(Mutex::new(handle)));
        Ok(())
    }

    /// Bind the device named by the configuration
    pub fn initialize_from_config(&self) -> Result<()> {
        self.initialize(self.config.device_index)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().device.is_some()
    }

    /// Pin at `index`; the stage has exactly one
    pub fn pin(&self, index: usize) -> Option<PinInfo> {
        (index == 0).then(|| self.inner.lock().port.info())
    }

    pub fn pin_count(&self) -> usize {
        1
    }

    /// Category of the output pin
    pub fn pin_category(&self) -> PinCategory {
        self.inner.lock().port.category()
    }

    /// The pin category is fixed
    pub fn set_pin_category(&self, _category: PinCategory) -> Result<()> {
        Err(CaptureError::PropertySetUnsupported)
    }

    pub fn misc_flags(&self) -> MiscFlags {
        MiscFlags::IS_SOURCE
    }

    /// Acquisition counters and the last thread exit reason
    pub fn stats(&self) -> AcquisitionSnapshot {
        self.stats.snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().port.is_connected()
    }

    /// Connect the output port to `peer`
    ///
    /// With `format` given, only that format is tried; otherwise the
    /// device's media types are offered in order until the peer takes one.
    pub fn connect(&self, peer: &Arc<dyn InputPin>, format: Option<&FormatDescriptor>) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ensure_stopped()?;
        if inner.port.is_connected() {
            return Err(CaptureError::AlreadyConnected);
        }
        self.connect_locked(&mut inner, peer, format)
    }

    /// Disconnect the peer. Returns whether a peer was connected.
    pub fn disconnect(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        self.ensure_stopped()?;
        if !inner.port.is_connected() {
            return Ok(false);
        }
        if let Some(peer) = inner.port.detach() {
            peer.disconnect();
        }
        info!("Output port disconnected");
        Ok(true)
    }

    fn ensure_stopped(&self) -> Result<()> {
        if self.state.get() != StreamState::Stopped {
            return Err(CaptureError::NotStopped);
        }
        Ok(())
    }

    fn device(inner: &StageInner) -> Result<Arc<Mutex<DeviceHandle>>> {
        inner.device.clone().ok_or(CaptureError::NotInitialized)
    }

    fn connect_locked(
        &self,
        inner: &mut StageInner,
        peer: &Arc<dyn InputPin>,
        format: Option<&FormatDescriptor>,
    ) -> Result<()> {
        let device = Self::device(inner)?;

        let agreed = {
            let device = device.lock();
            match format {
                Some(format) => {
                    if !format.is_video() {
                        return Err(CaptureError::NotVideo);
                    }
                    if !device.check_format(format) {
                        return Err(CaptureError::Backend(format!(
                            "Device cannot produce {}",
                            format
                        )));
                    }
                    peer.receive_connection(format)?;
                    format.clone()
                }
                None => Self::negotiate_media_type(&device, peer)?,
            }
        };

        let allocator = match self.decide_allocator(peer) {
            Ok(allocator) => allocator,
            Err(e) => {
                warn!("Allocator negotiation failed: {}", e);
                peer.disconnect();
                return Err(e);
            }
        };

        info!("Output port connected: {}", agreed);
        inner.port.attach(peer, agreed, allocator);
        Ok(())
    }

    fn negotiate_media_type(
        device: &DeviceHandle,
        peer: &Arc<dyn InputPin>,
    ) -> Result<FormatDescriptor> {
        let mut index = 0;
        while let Some(candidate) = device.media_type(index) {
            index += 1;
            if !device.check_format(&candidate) {
                continue;
            }
            match peer.receive_connection(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) => debug!("Peer refused media type {}: {}", candidate, e),
            }
        }
        Err(CaptureError::PeerRejected)
    }

    fn decide_allocator(&self, peer: &Arc<dyn InputPin>) -> Result<Arc<dyn MemAllocator>> {
        let allocator = peer
            .allocator()
            .unwrap_or_else(|| Arc::new(FramePool::new()) as Arc<dyn MemAllocator>);
        let request = peer
            .allocator_requirements()
            .with_defaults(&self.config.pool);
        allocator.set_properties(&request)?;
        Ok(allocator)
    }

    fn reconnect_locked(&self, inner: &mut StageInner, peer: &Arc<dyn InputPin>) -> Result<()> {
        inner.port.detach();
        peer.disconnect();

        let format = Self::device(inner)?.lock().get_format();
        self.connect_locked(inner, peer, Some(&format))?;
        info!("Reconnection completed with new format {}", format);
        Ok(())
    }

    /// Put the device and the connection back the way they were before a
    /// failed format change
    fn restore_format_locked(
        &self,
        inner: &mut StageInner,
        peer: &Arc<dyn InputPin>,
        device_format: &FormatDescriptor,
        port_format: &FormatDescriptor,
    ) {
        if let Some(device) = inner.device.clone() {
            if let Err(e) = device.lock().set_format(device_format) {
                warn!("Failed to restore device format {}: {}", device_format, e);
            }
        }
        if inner.port.is_connected() {
            return;
        }
        match self.connect_locked(inner, peer, Some(port_format)) {
            Ok(()) => info!("Restored connection with format {}", port_format),
            Err(e) => warn!("Failed to restore connection with {}: {}", port_format, e),
        }
    }

    fn prepare_locked(&self, inner: &mut StageInner) -> Result<()> {
        let state = self.state.get();
        if state != StreamState::Stopped {
            return Err(CaptureError::InvalidState {
                operation: "prepare",
                state,
            });
        }

        let device = Self::device(inner)?;
        let format = inner
            .port
            .format()
            .cloned()
            .ok_or(CaptureError::NotConnected)?;
        let allocator = inner.port.allocator().ok_or(CaptureError::NotConnected)?;
        let output = inner.port.delivery().ok_or(CaptureError::NotConnected)?;

        let image_size = format.image_size();
        let request = BufferPoolRequest::new(0, image_size, 0).with_defaults(&self.config.pool);
        let granted = allocator.set_properties(&request).map_err(|e| {
            warn!(
                "Failed to set allocator properties (buffer size {}): {}",
                image_size, e
            );
            e
        })?;

        if granted.buffer_size < image_size {
            if self.config.strict_buffer_size {
                return Err(CaptureError::BufferTooSmall {
                    required: image_size,
                    available: granted.buffer_size,
                });
            }
            warn!(
                "Negotiated buffers ({} bytes) are smaller than a frame ({} bytes)",
                granted.buffer_size, image_size
            );
        }

        allocator.commit().map_err(|e| {
            warn!("Failed to commit allocator: {}", e);
            e
        })?;

        self.state.set(StreamState::Paused);

        let ctx = AcquisitionContext {
            state: self.state.clone(),
            device,
            allocator: allocator.clone(),
            output,
            image_size,
            stats: self.stats.clone(),
        };
        match AcquisitionWorker::spawn(ctx, &self.config.thread_name) {
            Ok(worker) => {
                inner.worker = Some(worker);
                inner.committed = Some(allocator);
                info!(
                    "Capture prepared: {} x {} bytes for {}",
                    granted.buffer_count, granted.buffer_size, format
                );
                Ok(())
            }
            Err(e) => {
                self.state.set(StreamState::Stopped);
                if let Err(de) = allocator.decommit() {
                    warn!("Failed to decommit allocator: {}", de);
                }
                Err(CaptureError::Io(e))
            }
        }
    }

    fn cleanup_locked(&self, inner: &mut StageInner) {
        self.state.set(StreamState::Stopped);

        if let Some(worker) = inner.worker.take() {
            worker.join();
        }

        if let Some(allocator) = inner.committed.take() {
            match allocator.decommit() {
                Ok(()) => {}
                Err(CaptureError::NotCommitted) => warn!("Allocator was already decommitted"),
                Err(e) => warn!("Failed to decommit allocator: {}", e),
            }
        }
    }

    #[cfg(test)]
    fn begin_transition(&self) {
        let busy = self
            .state
            .in_transition
            .swap(true, std::sync::atomic::Ordering::SeqCst);
        assert!(!busy, "two transitions overlapped");
    }

    #[cfg(not(test))]
    fn begin_transition(&self) {}

    #[cfg(test)]
    fn end_transition(&self) {
        self.state
            .in_transition
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(not(test))]
    fn end_transition(&self) {}

    fn transition<T>(&self, f: impl FnOnce(&mut StageInner) -> T) -> T {
        let mut inner = self.inner.lock();
        self.begin_transition();
        let result = f(&mut inner);
        self.end_transition();
        result
    }
}

impl MediaFilter for CaptureStage {
    fn state(&self) -> StreamState {
        self.state.get()
    }

    fn prepare(&self) -> Result<()> {
        self.transition(|inner| self.prepare_locked(inner))
    }

    fn run(&self) -> Result<()> {
        self.transition(|inner| {
            match self.state.get() {
                StreamState::Running => return Ok(()),
                StreamState::Stopped => self.prepare_locked(inner)?,
                StreamState::Paused => {}
            }
            self.state.set(StreamState::Running);
            info!("Capture running");
            Ok(())
        })
    }

    fn pause(&self) -> Result<()> {
        self.transition(|inner| {
            match self.state.get() {
                StreamState::Paused => {}
                StreamState::Stopped => self.prepare_locked(inner)?,
                StreamState::Running => {
                    self.state.set(StreamState::Paused);
                    info!("Capture paused");
                }
            }
            Ok(())
        })
    }

    fn cleanup(&self) -> Result<()> {
        self.transition(|inner| {
            self.cleanup_locked(inner);
            info!("Capture stopped");
            Ok(())
        })
    }

    fn query_ready(&self) -> ReadyState {
        match self.state.get() {
            StreamState::Paused => ReadyState::CantCue,
            StreamState::Stopped | StreamState::Running => ReadyState::Ready,
        }
    }
}

impl StreamConfig for CaptureStage {
    fn get_format(&self) -> Result<FormatDescriptor> {
        let inner = self.inner.lock();
        if let Some(format) = inner.port.format() {
            return Ok(format.clone());
        }
        let format = Self::device(&inner)?.lock().get_format();
        Ok(format)
    }

    fn set_format(&self, format: Option<&FormatDescriptor>) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ensure_stopped()?;

        let format = format.ok_or(CaptureError::NullFormat)?;
        if !format.is_video() {
            return Err(CaptureError::NotVideo);
        }
        debug!("Setting format {}", format);

        let peer = inner.port.peer()?;
        if let Some(peer) = &peer {
            if !peer.query_accept(format)? {
                debug!("Peer would reject {}", format);
                return Err(CaptureError::PeerRejected);
            }
        }

        let device = Self::device(&inner)?;
        let previous = device.lock().get_format();
        device.lock().set_format(format)?;

        if let Some(peer) = peer {
            let connected_with = inner
                .port
                .format()
                .cloned()
                .unwrap_or_else(|| previous.clone());
            if let Err(e) = self.reconnect_locked(&mut inner, &peer) {
                warn!("Reconnection with {} failed, reverting: {}", format, e);
                self.restore_format_locked(&mut inner, &peer, &previous, &connected_with);
                return Err(e);
            }
        }
        Ok(())
    }

    fn number_of_capabilities(&self) -> Result<(usize, usize)> {
        let inner = self.inner.lock();
        let count = Self::device(&inner)?.lock().caps_count();
        Ok((count, CAPABILITY_RECORD_SIZE))
    }

    fn stream_caps(&self, index: usize) -> Result<Option<(FormatDescriptor, CapabilityRange)>> {
        let inner = self.inner.lock();
        let device = Self::device(&inner)?;
        let device = device.lock();
        if index >= device.caps_count() {
            return Ok(None);
        }
        device.caps(index).map(Some)
    }
}

impl VideoProcAmp for CaptureStage {
    fn get_range(&self, property: VideoProcAmpProperty) -> Result<PropertyRange> {
        let inner = self.inner.lock();
        let range = Self::device(&inner)?.lock().prop_range(property);
        range
    }

    fn set(&self, property: VideoProcAmpProperty, value: i32, flags: PropertyFlags) -> Result<()> {
        debug!("Setting {} = {} (flags {:#x})", property, value, flags.0);
        let inner = self.inner.lock();
        let result = Self::device(&inner)?.lock().set_prop(property, value, flags);
        result
    }

    fn get(&self, property: VideoProcAmpProperty) -> Result<PropertyValue> {
        let inner = self.inner.lock();
        let value = Self::device(&inner)?.lock().get_prop(property);
        value
    }
}

impl Drop for CaptureStage {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.worker.is_some() || inner.committed.is_some() {
            warn!("Capture stage dropped while streaming, stopping");
        }

        self.state.set(StreamState::Stopped);
        if let Some(worker) = inner.worker.take() {
            worker.join();
        }
        if let Some(allocator) = inner.committed.take() {
            match allocator.decommit() {
                Ok(()) | Err(CaptureError::NotCommitted) => {}
                Err(e) => warn!("Failed to decommit allocator: {}", e),
            }
        }
        if let Some(peer) = inner.port.detach() {
            peer.disconnect();
        }
        inner.device = None;
    }
}

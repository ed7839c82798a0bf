//! In-memory backend, peer and allocator used by the unit tests

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::backend::CaptureBackend;
use super::device::CaptureDevice;
use super::format::{CapabilityRange, FormatDescriptor, PixelFormat, Resolution};
use super::pool::{AllocatorProperties, BufferPoolRequest, FramePool, MediaSample, MemAllocator};
use super::port::InputPin;
use super::properties::{PropertyFlags, PropertyRange, PropertyValue, VideoProcAmpProperty};
use super::stage::CaptureStage;
use crate::config::StageConfig;
use crate::error::{CaptureError, Result};

/// Counters shared by a mock backend and every device it creates
#[derive(Default)]
pub struct DeviceProbe {
    reads: AtomicU64,
    set_format_calls: AtomicUsize,
    caps_indices: Mutex<Vec<usize>>,
    live: AtomicUsize,
}

impl DeviceProbe {
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn set_format_calls(&self) -> usize {
        self.set_format_calls.load(Ordering::SeqCst)
    }

    /// Indices passed to `caps`, in call order
    pub fn caps_requested(&self) -> Vec<usize> {
        self.caps_indices.lock().clone()
    }

    pub fn live_devices(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

fn default_catalogue() -> Vec<(FormatDescriptor, CapabilityRange)> {
    [
        FormatDescriptor::video(Resolution::VGA, PixelFormat::Yuyv),
        FormatDescriptor::video(Resolution::QVGA, PixelFormat::Rgb24),
        FormatDescriptor::video(Resolution::HD720, PixelFormat::Nv12),
    ]
    .into_iter()
    .map(|format| {
        let range = CapabilityRange::fixed(&format);
        (format, range)
    })
    .collect()
}

pub struct MockBackend {
    probe: Arc<DeviceProbe>,
    catalogue: Vec<(FormatDescriptor, CapabilityRange)>,
    format: FormatDescriptor,
    refuse: bool,
    fail_read_on: Option<u64>,
    read_delay: Option<Duration>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            probe: Arc::new(DeviceProbe::default()),
            catalogue: default_catalogue(),
            format: FormatDescriptor::video(Resolution::VGA, PixelFormat::Yuyv),
            refuse: false,
            fail_read_on: None,
            read_delay: None,
        }
    }

    /// Every `create` returns nothing
    pub fn refuse_create(mut self) -> Self {
        self.refuse = true;
        self
    }

    /// Initial format of created devices
    pub fn with_format(mut self, format: FormatDescriptor) -> Self {
        self.format = format;
        self
    }

    /// The `n`th read (1-based) fails
    pub fn fail_read_on(mut self, n: u64) -> Self {
        self.fail_read_on = Some(n);
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn probe(&self) -> Arc<DeviceProbe> {
        self.probe.clone()
    }

    pub fn catalogue(&self) -> &[(FormatDescriptor, CapabilityRange)] {
        &self.catalogue
    }

    pub fn live_devices(&self) -> usize {
        self.probe.live_devices()
    }
}

impl CaptureBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn create(&self, _index: u32) -> Option<Box<dyn CaptureDevice>> {
        if self.refuse {
            return None;
        }
        self.probe.live.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(MockDevice {
            probe: self.probe.clone(),
            catalogue: self.catalogue.clone(),
            format: self.format.clone(),
            fail_read_on: self.fail_read_on,
            read_delay: self.read_delay,
            brightness: PropertyValue {
                value: 128,
                flags: PropertyFlags::MANUAL,
            },
            contrast: PropertyValue {
                value: 128,
                flags: PropertyFlags::MANUAL,
            },
        }))
    }
}

struct MockDevice {
    probe: Arc<DeviceProbe>,
    catalogue: Vec<(FormatDescriptor, CapabilityRange)>,
    format: FormatDescriptor,
    fail_read_on: Option<u64>,
    read_delay: Option<Duration>,
    brightness: PropertyValue,
    contrast: PropertyValue,
}

impl MockDevice {
    fn slot(&mut self, property: VideoProcAmpProperty) -> Result<&mut PropertyValue> {
        match property {
            VideoProcAmpProperty::Brightness => Ok(&mut self.brightness),
            VideoProcAmpProperty::Contrast => Ok(&mut self.contrast),
            other => Err(CaptureError::PropertyUnsupported(other.id())),
        }
    }
}

impl CaptureDevice for MockDevice {
    fn read_frame(&mut self, buffer: &mut [u8]) -> bool {
        let n = self.probe.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }
        if self.fail_read_on == Some(n) {
            return false;
        }
        buffer.fill(n as u8);
        true
    }

    fn set_format(&mut self, format: &FormatDescriptor) -> Result<()> {
        self.probe.set_format_calls.fetch_add(1, Ordering::SeqCst);
        if !self.check_format(format) {
            return Err(CaptureError::Backend(format!("Unsupported format {}", format)));
        }
        self.format = format.clone();
        Ok(())
    }

    fn get_format(&self) -> FormatDescriptor {
        self.format.clone()
    }

    fn caps_count(&self) -> usize {
        self.catalogue.len()
    }

    fn caps(&self, index: usize) -> Option<(FormatDescriptor, CapabilityRange)> {
        self.probe.caps_indices.lock().push(index);
        self.catalogue.get(index).cloned()
    }

    fn check_format(&self, format: &FormatDescriptor) -> bool {
        format.is_video()
            && self
                .catalogue
                .iter()
                .any(|(entry, range)| entry.bit_count == format.bit_count && range.allows(format))
    }

    fn media_type(&self, index: usize) -> Option<FormatDescriptor> {
        self.catalogue.get(index).map(|(format, _)| format.clone())
    }

    fn get_prop(&self, property: VideoProcAmpProperty) -> Result<PropertyValue> {
        match property {
            VideoProcAmpProperty::Brightness => Ok(self.brightness),
            VideoProcAmpProperty::Contrast => Ok(self.contrast),
            other => Err(CaptureError::PropertyUnsupported(other.id())),
        }
    }

    fn set_prop(
        &mut self,
        property: VideoProcAmpProperty,
        value: i32,
        flags: PropertyFlags,
    ) -> Result<()> {
        let range = self.prop_range(property)?;
        if !range.contains(value) {
            return Err(CaptureError::Backend(format!(
                "{} out of range for {}",
                value, property
            )));
        }
        *self.slot(property)? = PropertyValue { value, flags };
        Ok(())
    }

    fn prop_range(&self, property: VideoProcAmpProperty) -> Result<PropertyRange> {
        match property {
            VideoProcAmpProperty::Brightness | VideoProcAmpProperty::Contrast => Ok(PropertyRange {
                min: 0,
                max: 255,
                step: 1,
                default: 128,
                flags: PropertyFlags::MANUAL,
            }),
            other => Err(CaptureError::PropertyUnsupported(other.id())),
        }
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.probe.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Downstream peer that drops every sample on arrival unless told to hold them
pub struct MockPeer {
    accept: AtomicBool,
    accept_only: Option<Resolution>,
    fail_receive: AtomicBool,
    fail_next_connection: AtomicBool,
    hold_samples: AtomicBool,
    held: Mutex<Vec<MediaSample>>,
    allocator: Mutex<Option<Arc<dyn MemAllocator>>>,
    connections: AtomicUsize,
    disconnects: AtomicUsize,
    received: AtomicUsize,
    last_len: AtomicUsize,
    last_sequence: Mutex<Option<u64>>,
    in_order: AtomicBool,
}

impl MockPeer {
    pub fn new() -> Self {
        Self {
            accept: AtomicBool::new(true),
            accept_only: None,
            fail_receive: AtomicBool::new(false),
            fail_next_connection: AtomicBool::new(false),
            hold_samples: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
            allocator: Mutex::new(None),
            connections: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            received: AtomicUsize::new(0),
            last_len: AtomicUsize::new(0),
            last_sequence: Mutex::new(None),
            in_order: AtomicBool::new(true),
        }
    }

    /// Accept only formats with this resolution
    pub fn accept_only(mut self, resolution: Resolution) -> Self {
        self.accept_only = Some(resolution);
        self
    }

    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    pub fn fail_receive(&self, fail: bool) {
        self.fail_receive.store(fail, Ordering::SeqCst);
    }

    /// Refuse the next `receive_connection` even though `query_accept` agrees
    pub fn fail_next_connection(&self) {
        self.fail_next_connection.store(true, Ordering::SeqCst);
    }

    /// Keep received samples instead of dropping them
    pub fn hold_samples(&self, hold: bool) {
        self.hold_samples.store(hold, Ordering::SeqCst);
    }

    pub fn held(&self) -> usize {
        self.held.lock().len()
    }

    /// Drop up to `n` held samples, returning their buffers to the pool
    pub fn release(&self, n: usize) {
        let mut held = self.held.lock();
        let n = n.min(held.len());
        held.drain(..n);
    }

    /// Offer this allocator on the next connection
    pub fn set_allocator(&self, allocator: Arc<dyn MemAllocator>) {
        *self.allocator.lock() = Some(allocator);
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    /// Payload length of the most recent sample
    pub fn last_len(&self) -> usize {
        self.last_len.load(Ordering::SeqCst)
    }

    /// Whether sequence numbers have been consecutive so far
    pub fn sequences_in_order(&self) -> bool {
        self.in_order.load(Ordering::SeqCst)
    }

    fn accepts(&self, format: &FormatDescriptor) -> bool {
        self.accept.load(Ordering::SeqCst)
            && self
                .accept_only
                .map_or(true, |resolution| resolution == format.resolution)
    }
}

impl InputPin for MockPeer {
    fn query_accept(&self, format: &FormatDescriptor) -> Result<bool> {
        Ok(self.accepts(format))
    }

    fn receive_connection(&self, format: &FormatDescriptor) -> Result<()> {
        if !self.accepts(format) || self.fail_next_connection.swap(false, Ordering::SeqCst) {
            return Err(CaptureError::PeerRejected);
        }
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn receive(&self, sample: MediaSample) -> Result<()> {
        if self.fail_receive.load(Ordering::SeqCst) {
            return Err(CaptureError::Delivery("peer refused sample".to_string()));
        }

        let mut last = self.last_sequence.lock();
        if let Some(prev) = *last {
            if sample.sequence != prev + 1 {
                self.in_order.store(false, Ordering::SeqCst);
            }
        } else if sample.sequence != 0 {
            self.in_order.store(false, Ordering::SeqCst);
        }
        *last = Some(sample.sequence);

        self.last_len.store(sample.actual_len(), Ordering::SeqCst);
        drop(last);
        if self.hold_samples.load(Ordering::SeqCst) {
            self.held.lock().push(sample);
        }
        self.received.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn allocator(&self) -> Option<Arc<dyn MemAllocator>> {
        self.allocator.lock().clone()
    }
}

/// `FramePool` wrapper that records negotiation and commit traffic
pub struct PoolSpy {
    inner: FramePool,
    requests: Mutex<Vec<BufferPoolRequest>>,
    commits: AtomicUsize,
    decommits: AtomicUsize,
    grant_size: Option<usize>,
    fail_commit: bool,
}

impl PoolSpy {
    pub fn new() -> Self {
        Self {
            inner: FramePool::new(),
            requests: Mutex::new(Vec::new()),
            commits: AtomicUsize::new(0),
            decommits: AtomicUsize::new(0),
            grant_size: None,
            fail_commit: false,
        }
    }

    /// Grant this buffer size whatever is requested
    pub fn grant_size(mut self, size: usize) -> Self {
        self.grant_size = Some(size);
        self
    }

    pub fn fail_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn last_request(&self) -> Option<BufferPoolRequest> {
        self.requests.lock().last().copied()
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn decommits(&self) -> usize {
        self.decommits.load(Ordering::SeqCst)
    }
}

impl MemAllocator for PoolSpy {
    fn set_properties(&self, request: &BufferPoolRequest) -> Result<AllocatorProperties> {
        self.requests.lock().push(*request);
        let mut granted = *request;
        if let Some(size) = self.grant_size {
            granted.buffer_size = size;
        }
        self.inner.set_properties(&granted)
    }

    fn properties(&self) -> Option<AllocatorProperties> {
        self.inner.properties()
    }

    fn commit(&self) -> Result<()> {
        if self.fail_commit {
            return Err(CaptureError::OutOfMemory("commit refused".to_string()));
        }
        self.inner.commit()?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn decommit(&self) -> Result<()> {
        self.inner.decommit()?;
        self.decommits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get_buffer(&self) -> Result<MediaSample> {
        self.inner.get_buffer()
    }
}

/// Stage bound to device 0 of `backend` and connected to `peer`
pub fn connected_stage(backend: MockBackend, peer: &Arc<MockPeer>) -> CaptureStage {
    let stage = CaptureStage::new(Arc::new(backend), StageConfig::default());
    stage.initialize(0).unwrap();
    let peer: Arc<dyn InputPin> = peer.clone();
    stage.connect(&peer, None).unwrap();
    stage
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_for(condition: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

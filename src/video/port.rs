//! Output port and the downstream peer contract

use serde::Serialize;
use std::sync::{Arc, Weak};
use tracing::debug;

use super::format::FormatDescriptor;
use super::pool::{BufferPoolRequest, MediaSample, MemAllocator};
use crate::error::{CaptureError, Result};

/// Name of the stage's only pin
pub const OUTPUT_PIN_NAME: &str = "Output";

/// Downstream consumer connected to the output port
pub trait InputPin: Send + Sync {
    /// Would the peer accept `format` if offered now
    fn query_accept(&self, format: &FormatDescriptor) -> Result<bool>;

    /// Complete a connection using `format`
    fn receive_connection(&self, format: &FormatDescriptor) -> Result<()>;

    /// Consume one filled sample. Dropping the sample returns its buffer.
    fn receive(&self, sample: MediaSample) -> Result<()>;

    /// Break the connection
    fn disconnect(&self);

    /// Allocator the peer wants the stage to use
    fn allocator(&self) -> Option<Arc<dyn MemAllocator>> {
        None
    }

    /// Buffer requirements; zero fields fall back to stage defaults
    fn allocator_requirements(&self) -> BufferPoolRequest {
        BufferPoolRequest::default()
    }
}

/// Role a pin plays in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PinCategory {
    Capture,
    Preview,
}

/// Snapshot describing a pin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PinInfo {
    pub name: &'static str,
    pub category: PinCategory,
    pub connected: bool,
    pub format: Option<FormatDescriptor>,
}

/// The stage's single downstream connection point
///
/// The peer is held weakly: the port never keeps a consumer alive, it only
/// remembers it until `detach`.
pub struct OutputPort {
    peer: Option<Weak<dyn InputPin>>,
    format: Option<FormatDescriptor>,
    allocator: Option<Arc<dyn MemAllocator>>,
}

impl OutputPort {
    pub fn new() -> Self {
        Self {
            peer: None,
            format: None,
            allocator: None,
        }
    }

    pub fn name(&self) -> &'static str {
        OUTPUT_PIN_NAME
    }

    pub fn category(&self) -> PinCategory {
        PinCategory::Capture
    }

    pub fn is_connected(&self) -> bool {
        self.peer.is_some()
    }

    /// Connected peer, `PeerGone` if it was dropped without disconnecting
    pub fn peer(&self) -> Result<Option<Arc<dyn InputPin>>> {
        match &self.peer {
            Some(weak) => weak.upgrade().map(Some).ok_or(CaptureError::PeerGone),
            None => Ok(None),
        }
    }

    /// Negotiated format
    pub fn format(&self) -> Option<&FormatDescriptor> {
        self.format.as_ref()
    }

    /// Allocator chosen during connection
    pub fn allocator(&self) -> Option<Arc<dyn MemAllocator>> {
        self.allocator.clone()
    }

    pub fn info(&self) -> PinInfo {
        PinInfo {
            name: self.name(),
            category: self.category(),
            connected: self.is_connected(),
            format: self.format.clone(),
        }
    }

    /// Record a completed connection
    pub(crate) fn attach(
        &mut self,
        peer: &Arc<dyn InputPin>,
        format: FormatDescriptor,
        allocator: Arc<dyn MemAllocator>,
    ) {
        debug!("Output port connected with {}", format);
        self.peer = Some(Arc::downgrade(peer));
        self.format = Some(format);
        self.allocator = Some(allocator);
    }

    /// Forget the peer and the negotiated state, returning the peer if alive
    pub(crate) fn detach(&mut self) -> Option<Arc<dyn InputPin>> {
        self.format = None;
        self.allocator = None;
        self.peer.take().and_then(|weak| weak.upgrade())
    }

    /// Handle the acquisition thread uses to push samples downstream
    pub(crate) fn delivery(&self) -> Option<Delivery> {
        self.peer.clone().map(|peer| Delivery { peer })
    }
}

impl Default for OutputPort {
    fn default() -> Self {
        Self::new()
    }
}

/// Detached delivery path to the connected peer
pub(crate) struct Delivery {
    peer: Weak<dyn InputPin>,
}

impl Delivery {
    pub(crate) fn deliver(&self, sample: MediaSample) -> Result<()> {
        let peer = self.peer.upgrade().ok_or(CaptureError::PeerGone)?;
        peer.receive(sample)
    }
}

//! Negotiated frame buffer pool
//!
//! A pool is sized in two phases: the stage proposes a `BufferPoolRequest`,
//! the allocator answers with the `AllocatorProperties` it actually uses.
//! Committing allocates the buffers; decommitting releases them and wakes
//! anyone blocked waiting for a free buffer.

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, trace};

use crate::config::PoolConfig;
use crate::error::{CaptureError, Result};

/// Buffer configuration proposed to an allocator
///
/// Zero fields mean "use the default".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferPoolRequest {
    pub buffer_count: u32,
    pub buffer_size: usize,
    pub alignment: usize,
}

impl BufferPoolRequest {
    pub fn new(buffer_count: u32, buffer_size: usize, alignment: usize) -> Self {
        Self {
            buffer_count,
            buffer_size,
            alignment,
        }
    }

    /// Replace zero fields with the configured defaults
    pub fn with_defaults(mut self, defaults: &PoolConfig) -> Self {
        if self.buffer_count == 0 {
            self.buffer_count = defaults.buffer_count;
        }
        if self.buffer_size == 0 {
            self.buffer_size = defaults.buffer_size;
        }
        if self.alignment == 0 {
            self.alignment = defaults.alignment;
        }
        self
    }
}

/// Buffer configuration an allocator actually granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorProperties {
    pub buffer_count: u32,
    pub buffer_size: usize,
    pub alignment: usize,
}

/// Allocator shared between the stage and its downstream peer
pub trait MemAllocator: Send + Sync {
    /// Propose a configuration, returning what was granted
    fn set_properties(&self, request: &BufferPoolRequest) -> Result<AllocatorProperties>;

    /// Currently granted configuration
    fn properties(&self) -> Option<AllocatorProperties>;

    /// Allocate the buffers
    fn commit(&self) -> Result<()>;

    /// Release the buffers. Fails with `NotCommitted` when already idle.
    fn decommit(&self) -> Result<()>;

    /// Take a free buffer, blocking until one is returned
    fn get_buffer(&self) -> Result<MediaSample>;
}

/// One buffer handed out by an allocator
///
/// Dropping a sample returns its storage to the pool it came from.
pub struct MediaSample {
    data: BytesMut,
    actual_len: usize,
    /// Frame sequence number
    pub sequence: u64,
    /// Timestamp when the sample was filled
    pub capture_ts: Option<Instant>,
    home: Option<(Weak<PoolShared>, u64)>,
}

impl MediaSample {
    /// Wrap storage that does not belong to a `FramePool`
    pub fn new(data: BytesMut) -> Self {
        Self {
            data,
            actual_len: 0,
            sequence: 0,
            capture_ts: None,
            home: None,
        }
    }

    /// Total bytes available in the buffer
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes of valid payload
    pub fn actual_len(&self) -> usize {
        self.actual_len
    }

    /// Set the payload length, refusing lengths past the buffer end
    pub fn set_actual_len(&mut self, len: usize) -> Result<()> {
        if len > self.data.len() {
            return Err(CaptureError::BufferTooSmall {
                required: len,
                available: self.data.len(),
            });
        }
        self.actual_len = len;
        Ok(())
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data[..self.actual_len]
    }

    /// Mutable payload bytes
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.actual_len]
    }

    /// Check if sample carries no payload
    pub fn is_empty(&self) -> bool {
        self.actual_len == 0
    }
}

impl Drop for MediaSample {
    fn drop(&mut self) {
        if let Some((home, generation)) = self.home.take() {
            if let Some(shared) = home.upgrade() {
                shared.recycle(std::mem::take(&mut self.data), generation);
            }
        }
    }
}

impl std::fmt::Debug for MediaSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSample")
            .field("capacity", &self.capacity())
            .field("actual_len", &self.actual_len)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Allocate one zeroed buffer, reporting failure instead of aborting
fn alloc_buffer(size: usize) -> Result<BytesMut> {
    let mut data = Vec::new();
    data.try_reserve_exact(size)
        .map_err(|e| CaptureError::OutOfMemory(format!("{} byte buffer: {}", size, e)))?;
    data.resize(size, 0);
    Ok(Bytes::from(data).into())
}

struct PoolState {
    props: Option<AllocatorProperties>,
    committed: bool,
    /// Bumped on every commit so stale samples are not recycled
    generation: u64,
    free: Vec<BytesMut>,
    outstanding: usize,
}

struct PoolShared {
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolShared {
    fn recycle(&self, mut data: BytesMut, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.committed {
            data.clear();
            if let Some(props) = state.props {
                data.resize(props.buffer_size, 0);
            }
            state.free.push(data);
            self.available.notify_one();
        }
    }
}

/// Fixed-size buffer pool with blocking acquisition
pub struct FramePool {
    shared: Arc<PoolShared>,
    max_buffers: Option<u32>,
}

impl FramePool {
    /// Create a new, unconfigured pool
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    props: None,
                    committed: false,
                    generation: 0,
                    free: Vec::new(),
                    outstanding: 0,
                }),
                available: Condvar::new(),
            }),
            max_buffers: None,
        }
    }

    /// Create a pool that grants at most `max_buffers` buffers
    pub fn with_limit(max_buffers: u32) -> Self {
        Self {
            max_buffers: Some(max_buffers.max(1)),
            ..Self::new()
        }
    }

    /// Whether buffers are currently allocated
    pub fn is_committed(&self) -> bool {
        self.shared.state.lock().committed
    }

    /// Number of buffers ready to be handed out
    pub fn free_count(&self) -> usize {
        self.shared.state.lock().free.len()
    }

    /// Number of buffers currently held by callers
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemAllocator for FramePool {
    fn set_properties(&self, request: &BufferPoolRequest) -> Result<AllocatorProperties> {
        let mut state = self.shared.state.lock();
        if state.committed {
            return Err(CaptureError::AlreadyCommitted);
        }

        let alignment = request.alignment.max(1);
        let buffer_size = request.buffer_size.div_ceil(alignment) * alignment;
        let buffer_count = match self.max_buffers {
            Some(max) => request.buffer_count.clamp(1, max),
            None => request.buffer_count.max(1),
        };

        let props = AllocatorProperties {
            buffer_count,
            buffer_size,
            alignment,
        };
        debug!(
            "Pool granted {} x {} bytes (align {}), requested {} x {}",
            props.buffer_count,
            props.buffer_size,
            props.alignment,
            request.buffer_count,
            request.buffer_size
        );
        state.props = Some(props);
        Ok(props)
    }

    fn properties(&self) -> Option<AllocatorProperties> {
        self.shared.state.lock().props
    }

    fn commit(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.committed {
            return Ok(());
        }
        let props = state.props.ok_or_else(|| {
            CaptureError::Config("Pool properties must be set before commit".to_string())
        })?;

        let total = (props.buffer_count as usize)
            .checked_mul(props.buffer_size)
            .ok_or_else(|| {
                CaptureError::OutOfMemory(format!(
                    "{} x {} bytes overflows",
                    props.buffer_count, props.buffer_size
                ))
            })?;
        let mut free = Vec::new();
        free.try_reserve_exact(props.buffer_count as usize)
            .map_err(|e| CaptureError::OutOfMemory(format!("{} bytes: {}", total, e)))?;
        for _ in 0..props.buffer_count {
            free.push(alloc_buffer(props.buffer_size)?);
        }

        state.free = free;
        state.outstanding = 0;
        state.generation = state.generation.wrapping_add(1);
        state.committed = true;
        debug!("Pool committed: {} bytes", total);
        Ok(())
    }

    fn decommit(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if !state.committed {
            return Err(CaptureError::NotCommitted);
        }
        state.committed = false;
        state.free.clear();
        self.shared.available.notify_all();
        debug!("Pool decommitted ({} buffers still out)", state.outstanding);
        Ok(())
    }

    fn get_buffer(&self) -> Result<MediaSample> {
        let mut state = self.shared.state.lock();
        loop {
            if !state.committed {
                return Err(CaptureError::NotCommitted);
            }
            if let Some(data) = state.free.pop() {
                state.outstanding += 1;
                let generation = state.generation;
                return Ok(MediaSample {
                    data,
                    actual_len: 0,
                    sequence: 0,
                    capture_ts: None,
                    home: Some((Arc::downgrade(&self.shared), generation)),
                });
            }
            trace!("Pool exhausted, waiting for a buffer");
            self.shared.available.wait(&mut state);
        }
    }
}

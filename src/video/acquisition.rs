//! Acquisition thread
//!
//! One thread per prepare/cleanup window. It parks on the state condition
//! variable while paused, exits once it observes `Stopped`, and otherwise
//! loops: take a free buffer, have the device fill it, push it downstream.
//!
//! The thread also blocks inside `get_buffer` when every buffer is held
//! downstream, inside the device read, and inside peer delivery. None of
//! these have a timeout, so a cleanup issued meanwhile takes effect only
//! once the blocking call returns.

use parking_lot::Mutex;
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, trace};

use super::device::DeviceHandle;
use super::pool::MemAllocator;
use super::port::Delivery;
use super::stage::{StateCell, StreamState};
use crate::error::CaptureError;

/// Why an acquisition thread ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum AcquisitionExit {
    /// Observed the stopped state
    Stopped,
    /// Could not obtain or size a buffer
    BufferUnavailable(String),
    /// The device failed to fill a frame
    ReadFailed,
    /// The peer refused or could not take a sample
    DeliveryFailed(String),
}

impl AcquisitionExit {
    /// Error equivalent of an abnormal exit, `None` for a normal stop
    pub fn error(&self) -> Option<CaptureError> {
        match self {
            AcquisitionExit::Stopped => None,
            AcquisitionExit::BufferUnavailable(reason) => Some(CaptureError::Backend(reason.clone())),
            AcquisitionExit::ReadFailed => Some(CaptureError::ReadFailed),
            AcquisitionExit::DeliveryFailed(reason) => Some(CaptureError::Delivery(reason.clone())),
        }
    }
}

/// Counters shared between the stage and its acquisition thread
#[derive(Default)]
pub(crate) struct AcquisitionStats {
    frames_delivered: AtomicU64,
    active: AtomicBool,
    last_exit: Mutex<Option<AcquisitionExit>>,
}

impl AcquisitionStats {
    pub(crate) fn snapshot(&self) -> AcquisitionSnapshot {
        AcquisitionSnapshot {
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            active: self.active.load(Ordering::SeqCst),
            last_exit: self.last_exit.lock().clone(),
        }
    }
}

/// Point-in-time view of acquisition progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquisitionSnapshot {
    /// Frames delivered since the stage was created
    pub frames_delivered: u64,
    /// Whether an acquisition thread is currently looping
    pub active: bool,
    /// How the most recent thread ended
    pub last_exit: Option<AcquisitionExit>,
}

/// Everything the thread touches, fixed for the lifetime of one window
pub(crate) struct AcquisitionContext {
    pub state: Arc<StateCell>,
    pub device: Arc<Mutex<DeviceHandle>>,
    pub allocator: Arc<dyn MemAllocator>,
    pub output: Delivery,
    pub image_size: usize,
    pub stats: Arc<AcquisitionStats>,
}

/// Handle to a running acquisition thread
pub(crate) struct AcquisitionWorker {
    handle: JoinHandle<()>,
}

impl AcquisitionWorker {
    pub(crate) fn spawn(ctx: AcquisitionContext, name: &str) -> io::Result<Self> {
        ctx.stats.active.store(true, Ordering::SeqCst);
        *ctx.stats.last_exit.lock() = None;
        let stats = ctx.stats.clone();

        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || acquisition_main(ctx));

        match spawned {
            Ok(handle) => Ok(Self { handle }),
            Err(e) => {
                stats.active.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Wait for the thread to exit
    pub(crate) fn join(self) {
        if self.handle.join().is_err() {
            error!("Acquisition thread panicked");
        }
    }
}

fn acquisition_main(ctx: AcquisitionContext) {
    info!("Acquisition thread started ({} bytes per frame)", ctx.image_size);

    let exit = acquisition_loop(&ctx);
    match &exit {
        AcquisitionExit::Stopped => info!("Acquisition thread stopped"),
        AcquisitionExit::ReadFailed => error!("Device failed to read a frame, capture halted"),
        AcquisitionExit::BufferUnavailable(reason) => {
            error!("Failed to get a delivery buffer: {}", reason)
        }
        AcquisitionExit::DeliveryFailed(reason) => error!("Frame delivery failed: {}", reason),
    }

    *ctx.stats.last_exit.lock() = Some(exit);
    ctx.stats.active.store(false, Ordering::SeqCst);
}

fn acquisition_loop(ctx: &AcquisitionContext) -> AcquisitionExit {
    let mut sequence = 0u64;

    loop {
        if ctx.state.wait_while_paused() == StreamState::Stopped {
            return AcquisitionExit::Stopped;
        }

        let mut sample = match ctx.allocator.get_buffer() {
            Ok(sample) => sample,
            Err(e) => return AcquisitionExit::BufferUnavailable(e.to_string()),
        };

        // Refuses sizes past the buffer end, so the device never overruns it
        if let Err(e) = sample.set_actual_len(ctx.image_size) {
            return AcquisitionExit::BufferUnavailable(e.to_string());
        }

        if !ctx.device.lock().read_frame(sample.data_mut()) {
            return AcquisitionExit::ReadFailed;
        }

        sample.sequence = sequence;
        sample.capture_ts = Some(Instant::now());
        trace!("Delivering frame {}", sequence);

        if let Err(e) = ctx.output.deliver(sample) {
            return AcquisitionExit::DeliveryFailed(e.to_string());
        }

        sequence += 1;
        ctx.stats.frames_delivered.fetch_add(1, Ordering::Relaxed);
        if sequence == 1 {
            debug!("First frame delivered");
        }
    }
}

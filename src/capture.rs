//! This module contains all the capture logic

// The driver owns the receive thread and calls us back with every filled
// block. The callback does one thing, as fast as possible: copy the block
// into the sample ring under its lock and hand the driver its next buffer.
// Anything slower belongs on the consumer side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, trace};

use crate::driver::{Driver, StreamHandler};
use crate::error::{RadioError, Result};
use crate::monitoring::CaptureStats;
use crate::ring::SampleRing;

/// Round-robin selector over the receive buffers of a stream session
#[derive(Debug, Clone)]
pub struct BufferPool {
    len: usize,
    idx: usize,
}

impl BufferPool {
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(RadioError::Geometry("empty buffer pool".to_string()));
        }
        Ok(Self { len, idx: 0 })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index of the buffer to hand out now
    pub fn next_index(&mut self) -> usize {
        let rv = self.idx;
        // Pools are tiny (2 or 3), the mod is not worth avoiding
        self.idx = (self.idx + 1) % self.len;
        rv
    }
}

/// Producer side of the capture pipeline, registered with the driver as the
/// stream callback
pub struct CaptureEngine {
    ring: Arc<SampleRing>,
    pool: BufferPool,
    stop: Arc<AtomicBool>,
    halt: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
}

impl CaptureEngine {
    /// `stop` is the caller's process-wide flag; `halt` is raised by teardown
    pub fn new(
        ring: Arc<SampleRing>,
        pool: BufferPool,
        stop: Arc<AtomicBool>,
        halt: Arc<AtomicBool>,
        stats: Arc<CaptureStats>,
    ) -> Self {
        Self {
            ring,
            pool,
            stop,
            halt,
            stats,
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire) || self.halt.load(Ordering::Acquire)
    }
}

impl StreamHandler for CaptureEngine {
    fn on_block(&mut self, samples: &[i16]) -> Option<usize> {
        if !samples.is_empty() {
            self.ring.write(samples);
        }
        self.stats.record_block(samples.len());
        if self.stopping() {
            trace!("stop requested, ending RX stream");
            None
        } else {
            Some(self.pool.next_index())
        }
    }
}

/// The thread sitting in the driver's blocking stream call
pub struct CaptureThread {
    halt: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureThread {
    pub fn spawn<D: Driver>(driver: Arc<D>, halt: Arc<AtomicBool>) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("rx-stream".to_string())
            .spawn(move || {
                // Start stream and stay there until the callback ends it
                match driver.run_stream() {
                    Ok(()) => debug!("RX stream finished"),
                    Err(status) => error!(
                        code = status.0,
                        reason = %driver.strerror(status),
                        "RX stream failure"
                    ),
                }
            })?;
        debug!("capture thread started");
        Ok(Self {
            halt,
            handle: Some(handle),
        })
    }

    /// Ask the stream to end and wait for the thread to leave the driver
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.halt.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("capture thread panicked");
            } else {
                debug!("capture thread joined");
            }
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

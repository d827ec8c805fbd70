//! The boundary with the vendor radio SDK.
//!
//! Every backend call returns the SDK's raw status code on failure. The rest
//! of the crate only talks to hardware through [`Driver`], so a backend is
//! bound once, when the radio is configured.

use std::fmt;
use std::sync::Arc;

use tracing::error;

use crate::error::{RadioError, Result};

/// Non-zero status code returned by a backend call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(pub i32);

pub type DriverResult<T> = std::result::Result<T, Status>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Rx,
    Tx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Rx => write!(f, "RX"),
            Direction::Tx => write!(f, "TX"),
        }
    }
}

/// Layout of an asynchronous receive session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamGeometry {
    /// Buffers the driver allocates and cycles through
    pub num_buffers: usize,
    /// IQ pairs per buffer
    pub samples_per_buffer: usize,
    /// Transfers kept in flight
    pub num_transfers: usize,
}

/// Layout of a synchronous transmit session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncGeometry {
    pub num_buffers: usize,
    pub buffer_size: usize,
    pub num_transfers: usize,
    pub timeout_ms: u32,
}

/// Callback side of a receive stream. The driver calls it on its own thread
/// with each filled block of interleaved SC16 components and fills the pool
/// buffer whose index is returned next. `None` ends the stream.
pub trait StreamHandler: Send {
    fn on_block(&mut self, samples: &[i16]) -> Option<usize>;
}

/// Opaque calls into one physical radio backend
pub trait Driver: Send + Sync + 'static {
    fn open(&self) -> DriverResult<()>;
    fn close(&self);
    fn is_fpga_configured(&self) -> DriverResult<bool>;

    fn set_frequency(&self, dir: Direction, hz: u64) -> DriverResult<()>;
    /// Returns the rate actually achieved
    fn set_sample_rate(&self, dir: Direction, rate: u32) -> DriverResult<u32>;
    /// Returns the bandwidth actually achieved
    fn set_bandwidth(&self, dir: Direction, bandwidth: u32) -> DriverResult<u32>;
    fn set_gain(&self, dir: Direction, gain: i32) -> DriverResult<()>;
    fn enable_module(&self, dir: Direction, enable: bool) -> DriverResult<()>;

    fn init_stream(
        &self,
        geometry: StreamGeometry,
        handler: Box<dyn StreamHandler>,
    ) -> DriverResult<()>;
    fn set_stream_timeout(&self, dir: Direction, timeout_ms: u32) -> DriverResult<()>;
    /// Blocks until the handler ends the stream or the backend fails
    fn run_stream(&self) -> DriverResult<()>;
    fn deinit_stream(&self);

    fn sync_config(&self, dir: Direction, geometry: SyncGeometry) -> DriverResult<()>;
    /// Transmit `samples.len() / 2` IQ pairs
    fn sync_tx(&self, samples: &[i16], timeout_ms: u32) -> DriverResult<()>;

    /// Human readable reason for a status code
    fn strerror(&self, status: Status) -> String;
}

// Lets a caller keep a handle on the backend it configured a radio with
impl<D: Driver> Driver for Arc<D> {
    fn open(&self) -> DriverResult<()> {
        (**self).open()
    }
    fn close(&self) {
        (**self).close()
    }
    fn is_fpga_configured(&self) -> DriverResult<bool> {
        (**self).is_fpga_configured()
    }
    fn set_frequency(&self, dir: Direction, hz: u64) -> DriverResult<()> {
        (**self).set_frequency(dir, hz)
    }
    fn set_sample_rate(&self, dir: Direction, rate: u32) -> DriverResult<u32> {
        (**self).set_sample_rate(dir, rate)
    }
    fn set_bandwidth(&self, dir: Direction, bandwidth: u32) -> DriverResult<u32> {
        (**self).set_bandwidth(dir, bandwidth)
    }
    fn set_gain(&self, dir: Direction, gain: i32) -> DriverResult<()> {
        (**self).set_gain(dir, gain)
    }
    fn enable_module(&self, dir: Direction, enable: bool) -> DriverResult<()> {
        (**self).enable_module(dir, enable)
    }
    fn init_stream(
        &self,
        geometry: StreamGeometry,
        handler: Box<dyn StreamHandler>,
    ) -> DriverResult<()> {
        (**self).init_stream(geometry, handler)
    }
    fn set_stream_timeout(&self, dir: Direction, timeout_ms: u32) -> DriverResult<()> {
        (**self).set_stream_timeout(dir, timeout_ms)
    }
    fn run_stream(&self) -> DriverResult<()> {
        (**self).run_stream()
    }
    fn deinit_stream(&self) {
        (**self).deinit_stream()
    }
    fn sync_config(&self, dir: Direction, geometry: SyncGeometry) -> DriverResult<()> {
        (**self).sync_config(dir, geometry)
    }
    fn sync_tx(&self, samples: &[i16], timeout_ms: u32) -> DriverResult<()> {
        (**self).sync_tx(samples, timeout_ms)
    }
    fn strerror(&self, status: Status) -> String {
        (**self).strerror(status)
    }
}

/// Turn a backend status into a logged [`RadioError::Hardware`]
pub(crate) fn check<D, T>(driver: &D, op: &'static str, res: DriverResult<T>) -> Result<T>
where
    D: Driver + ?Sized,
{
    res.map_err(|status| {
        let reason = driver.strerror(status);
        error!(op, code = status.0, %reason, "backend call failed");
        RadioError::Hardware {
            op,
            code: status.0,
            reason,
        }
    })
}

//! Software backend.
//!
//! Behaves like a bladeRF session without hardware: the receive stream cycles
//! through its own buffer pool and fills it from a feed channel, transmitted
//! blocks are kept (and optionally looped back into the feed), every call is
//! journaled, and any operation can be made to fail with a chosen status.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::driver::{
    Direction, Driver, DriverResult, Status, StreamGeometry, StreamHandler, SyncGeometry,
};

pub const ERR_UNEXPECTED: Status = Status(-1);
pub const ERR_RANGE: Status = Status(-2);
pub const ERR_INVAL: Status = Status(-3);
pub const ERR_NODEV: Status = Status(-7);

const MIN_SAMPLE_RATE: u32 = 160_000;
const MAX_SAMPLE_RATE: u32 = 40_000_000;
const MIN_BANDWIDTH: u32 = 1_500_000;
const MAX_BANDWIDTH: u32 = 28_000_000;

/// One journaled backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    Close,
    FpgaCheck,
    SetFrequency(Direction, u64),
    SetSampleRate(Direction, u32),
    SetBandwidth(Direction, u32),
    SetGain(Direction, i32),
    EnableModule(Direction, bool),
    InitStream(StreamGeometry),
    SetStreamTimeout(Direction, u32),
    RunStream,
    DeinitStream,
    SyncConfig(Direction, SyncGeometry),
    SyncTx(usize),
}

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Open,
    FpgaCheck,
    SetFrequency(Direction),
    SetSampleRate(Direction),
    SetBandwidth(Direction),
    SetGain(Direction),
    EnableModule(Direction),
    InitStream,
    SetStreamTimeout,
    RunStream,
    SyncConfig,
    SyncTx,
}

struct SimStream {
    handler: Box<dyn StreamHandler>,
    buffers: Vec<Vec<i16>>,
}

pub struct SimDriver {
    fpga_loaded: AtomicBool,
    loopback: AtomicBool,
    failures: Mutex<HashMap<Op, Status>>,
    journal: Mutex<Vec<Call>>,
    stream: Mutex<Option<SimStream>>,
    streaming: AtomicBool,
    stream_timeout_ms: AtomicU32,
    feed_tx: Sender<Vec<i16>>,
    feed_rx: Receiver<Vec<i16>>,
    transmitted: Mutex<Vec<Vec<i16>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimDriver {
    pub fn new() -> Self {
        let (feed_tx, feed_rx) = unbounded();
        Self {
            fpga_loaded: AtomicBool::new(true),
            loopback: AtomicBool::new(false),
            failures: Mutex::new(HashMap::new()),
            journal: Mutex::new(Vec::new()),
            stream: Mutex::new(None),
            streaming: AtomicBool::new(false),
            stream_timeout_ms: AtomicU32::new(1000),
            feed_tx,
            feed_rx,
            transmitted: Mutex::new(Vec::new()),
        }
    }

    /// Pretend the FPGA image has (not) been loaded
    pub fn with_fpga_loaded(self, loaded: bool) -> Self {
        self.fpga_loaded.store(loaded, Ordering::SeqCst);
        self
    }

    /// Feed every transmitted block back into the receive stream
    pub fn with_loopback(self, loopback: bool) -> Self {
        self.loopback.store(loopback, Ordering::SeqCst);
        self
    }

    /// Make every later call of `op` return `status`
    pub fn fail(&self, op: Op, status: Status) {
        lock(&self.failures).insert(op, status);
    }

    /// Queue interleaved SC16 components for the receive stream
    pub fn feed(&self, block: Vec<i16>) {
        // We own the receiver, this cannot disconnect
        let _ = self.feed_tx.send(block);
    }

    /// Sender that feeds the receive stream from another thread
    pub fn feeder(&self) -> Sender<Vec<i16>> {
        self.feed_tx.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.journal).clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Blocks handed to `sync_tx` so far
    pub fn transmitted(&self) -> Vec<Vec<i16>> {
        lock(&self.transmitted).clone()
    }

    fn record(&self, call: Call, op: Option<Op>) -> DriverResult<()> {
        lock(&self.journal).push(call);
        match op.and_then(|op| lock(&self.failures).get(&op).copied()) {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for SimDriver {
    fn open(&self) -> DriverResult<()> {
        self.record(Call::Open, Some(Op::Open))
    }

    fn close(&self) {
        let _ = self.record(Call::Close, None);
    }

    fn is_fpga_configured(&self) -> DriverResult<bool> {
        self.record(Call::FpgaCheck, Some(Op::FpgaCheck))?;
        Ok(self.fpga_loaded.load(Ordering::SeqCst))
    }

    fn set_frequency(&self, dir: Direction, hz: u64) -> DriverResult<()> {
        self.record(Call::SetFrequency(dir, hz), Some(Op::SetFrequency(dir)))
    }

    fn set_sample_rate(&self, dir: Direction, rate: u32) -> DriverResult<u32> {
        self.record(Call::SetSampleRate(dir, rate), Some(Op::SetSampleRate(dir)))?;
        Ok(rate.clamp(MIN_SAMPLE_RATE, MAX_SAMPLE_RATE))
    }

    fn set_bandwidth(&self, dir: Direction, bandwidth: u32) -> DriverResult<u32> {
        self.record(Call::SetBandwidth(dir, bandwidth), Some(Op::SetBandwidth(dir)))?;
        Ok(bandwidth.clamp(MIN_BANDWIDTH, MAX_BANDWIDTH))
    }

    fn set_gain(&self, dir: Direction, gain: i32) -> DriverResult<()> {
        self.record(Call::SetGain(dir, gain), Some(Op::SetGain(dir)))
    }

    fn enable_module(&self, dir: Direction, enable: bool) -> DriverResult<()> {
        self.record(Call::EnableModule(dir, enable), Some(Op::EnableModule(dir)))
    }

    fn init_stream(
        &self,
        geometry: StreamGeometry,
        handler: Box<dyn StreamHandler>,
    ) -> DriverResult<()> {
        self.record(Call::InitStream(geometry), Some(Op::InitStream))?;
        if geometry.num_buffers == 0 || geometry.samples_per_buffer == 0 {
            return Err(ERR_INVAL);
        }
        let buffers = vec![vec![0i16; geometry.samples_per_buffer * 2]; geometry.num_buffers];
        *lock(&self.stream) = Some(SimStream { handler, buffers });
        Ok(())
    }

    fn set_stream_timeout(&self, dir: Direction, timeout_ms: u32) -> DriverResult<()> {
        self.record(Call::SetStreamTimeout(dir, timeout_ms), Some(Op::SetStreamTimeout))?;
        self.stream_timeout_ms.store(timeout_ms, Ordering::SeqCst);
        Ok(())
    }

    fn run_stream(&self) -> DriverResult<()> {
        self.record(Call::RunStream, Some(Op::RunStream))?;
        let mut session = lock(&self.stream);
        let SimStream { handler, buffers } = session.as_mut().ok_or(ERR_INVAL)?;
        let timeout = Duration::from_millis(self.stream_timeout_ms.load(Ordering::SeqCst) as u64);
        self.streaming.store(true, Ordering::SeqCst);
        debug!(buffers = buffers.len(), "sim stream running");

        let mut pending: Vec<i16> = Vec::new();
        let mut pos = 0;
        let mut idx = 0;
        let result = loop {
            if pos >= pending.len() {
                pos = 0;
                pending = match self.feed_rx.recv_timeout(timeout) {
                    Ok(mut block) => {
                        // Buffers hold whole IQ pairs
                        if block.len() % 2 != 0 {
                            warn!(len = block.len(), "odd feed block, dropping last component");
                            block.pop();
                        }
                        block
                    }
                    // A timed out transfer still reaches the callback, empty
                    Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                        Vec::new()
                    }
                };
            }
            let buf = &mut buffers[idx];
            let n = (pending.len() - pos).min(buf.len());
            buf[..n].copy_from_slice(&pending[pos..pos + n]);
            pos += n;
            match handler.on_block(&buf[..n]) {
                Some(next) if next < buffers.len() => idx = next,
                Some(next) => {
                    warn!(next, "stream callback returned a buffer outside the pool");
                    break Err(ERR_INVAL);
                }
                None => break Ok(()),
            }
        };

        self.streaming.store(false, Ordering::SeqCst);
        result
    }

    fn deinit_stream(&self) {
        let _ = self.record(Call::DeinitStream, None);
        lock(&self.stream).take();
    }

    fn sync_config(&self, dir: Direction, geometry: SyncGeometry) -> DriverResult<()> {
        self.record(Call::SyncConfig(dir, geometry), Some(Op::SyncConfig))
    }

    fn sync_tx(&self, samples: &[i16], _timeout_ms: u32) -> DriverResult<()> {
        self.record(Call::SyncTx(samples.len() / 2), Some(Op::SyncTx))?;
        lock(&self.transmitted).push(samples.to_vec());
        if self.loopback.load(Ordering::SeqCst) {
            self.feed(samples.to_vec());
        }
        Ok(())
    }

    fn strerror(&self, status: Status) -> String {
        match status {
            ERR_UNEXPECTED => "An unexpected failure occurred".to_string(),
            ERR_RANGE => "Provided parameter is out of range".to_string(),
            ERR_INVAL => "Invalid operation/parameter".to_string(),
            ERR_NODEV => "No device(s) available".to_string(),
            Status(code) => format!("Unknown error code {}", code),
        }
    }
}

//! Radio lifecycle: bring the device up for the enabled directions, hand out
//! the per-direction capability channels, and tear everything down again in
//! dependency order.
//!
//! Each hardware resource is held by a guard that releases it on drop. During
//! setup the guards live in locals, so an early return unwinds exactly what
//! was acquired. Once setup succeeds they move into [`Radio`]. Both paths
//! release in the same order: capture thread, stream, RX module, TX module,
//! device.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::capture::{BufferPool, CaptureEngine, CaptureThread};
use crate::driver::{check, Direction, Driver, StreamGeometry, SyncGeometry};
use crate::error::{RadioError, Result};
use crate::monitoring::{CaptureStats, StatsReport};
use crate::phase::{Phase, PhaseExtractor, Snapshot};
use crate::ring::SampleRing;
use crate::tuning::{Tunable, Tuner, Tuning};
use crate::tx::TxBlock;
use crate::{
    DEFAULT_POOL_BUFFERS, DEFAULT_RX_GAIN, DEFAULT_RX_TIMEOUT_MS, DEFAULT_TX_GAIN,
    DEFAULT_TX_TIMEOUT_MS, LEN_BUF, LEN_BUF_MAX_NUM_PHY_SAMPLE, RX_BUFFER_SAMPLES,
    TX_BLOCK_SAMPLES,
};

// Synchronous TX session layout
const TX_SYNC_BUFFERS: usize = 32;
const TX_SYNC_TRANSFERS: usize = 16;

/// Requested settings for one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectionConfig {
    pub enabled: bool,
    pub frequency: u64,
    pub sample_rate: u32,
    pub bandwidth: u32,
    /// Backend default when unset
    pub gain: Option<i32>,
}

impl DirectionConfig {
    pub fn new(frequency: u64, sample_rate: u32, bandwidth: u32) -> Self {
        Self {
            enabled: true,
            frequency,
            sample_rate,
            bandwidth,
            gain: None,
        }
    }

    pub fn with_gain(mut self, gain: i32) -> Self {
        self.gain = Some(gain);
        self
    }

    fn tuning(&self, default_gain: i32) -> Tuning {
        Tuning {
            enabled: self.enabled,
            frequency: self.frequency,
            sample_rate: self.sample_rate,
            bandwidth: self.bandwidth,
            gain: self.gain.unwrap_or(default_gain),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioConfig {
    pub rx: DirectionConfig,
    pub tx: DirectionConfig,
    /// Receive buffers the stream cycles through
    pub pool_buffers: usize,
    /// IQ pairs per receive buffer
    pub rx_buffer_samples: usize,
    pub rx_timeout_ms: u32,
    pub tx_timeout_ms: u32,
    /// Sample ring size in components
    pub ring_capacity: usize,
    /// Shadow region and window lookahead in components
    pub ring_margin: usize,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            rx: DirectionConfig::default(),
            tx: DirectionConfig::default(),
            pool_buffers: DEFAULT_POOL_BUFFERS,
            rx_buffer_samples: RX_BUFFER_SAMPLES,
            rx_timeout_ms: DEFAULT_RX_TIMEOUT_MS,
            tx_timeout_ms: DEFAULT_TX_TIMEOUT_MS,
            ring_capacity: LEN_BUF,
            ring_margin: LEN_BUF_MAX_NUM_PHY_SAMPLE,
        }
    }
}

impl RadioConfig {
    pub fn rx_only(rx: DirectionConfig) -> Self {
        Self {
            rx,
            ..Default::default()
        }
    }

    pub fn tx_only(tx: DirectionConfig) -> Self {
        Self {
            tx,
            ..Default::default()
        }
    }

    pub fn with_tx(mut self, tx: DirectionConfig) -> Self {
        self.tx = tx;
        self
    }

    fn directions(&self) -> impl Iterator<Item = (Direction, &DirectionConfig)> + '_ {
        // Same order as the bring-up sequence: TX before RX at every step
        [(Direction::Tx, &self.tx), (Direction::Rx, &self.rx)]
            .into_iter()
            .filter(|(_, c)| c.enabled)
    }

    fn check_geometry(&self) -> Result<()> {
        // Each watch region must contain at least one block boundary
        let block = 2 * self.rx_buffer_samples;
        let region = (self.ring_capacity / 2).saturating_sub(self.ring_margin);
        if self.rx.enabled && (block == 0 || block > region) {
            return Err(RadioError::Geometry(format!(
                "receive buffers of {} samples overrun the {} component watch region",
                self.rx_buffer_samples, region
            )));
        }
        Ok(())
    }
}

fn default_gain(dir: Direction) -> i32 {
    match dir {
        Direction::Rx => DEFAULT_RX_GAIN,
        Direction::Tx => DEFAULT_TX_GAIN,
    }
}

struct DeviceGuard<D: Driver> {
    driver: Arc<D>,
}

impl<D: Driver> DeviceGuard<D> {
    fn open(driver: Arc<D>) -> Result<Self> {
        check(&*driver, "open", driver.open())?;
        info!("device opened");
        Ok(Self { driver })
    }
}

impl<D: Driver> Drop for DeviceGuard<D> {
    fn drop(&mut self) {
        self.driver.close();
        info!("device closed");
    }
}

struct StreamGuard<D: Driver> {
    driver: Arc<D>,
}

impl<D: Driver> Drop for StreamGuard<D> {
    fn drop(&mut self) {
        self.driver.deinit_stream();
        debug!("RX stream deinitialized");
    }
}

struct ModuleGuard<D: Driver> {
    driver: Arc<D>,
    dir: Direction,
}

impl<D: Driver> ModuleGuard<D> {
    fn enable(driver: Arc<D>, dir: Direction) -> Result<Self> {
        check(&*driver, "enable_module", driver.enable_module(dir, true))?;
        info!(%dir, "module enabled");
        Ok(Self { driver, dir })
    }
}

impl<D: Driver> Drop for ModuleGuard<D> {
    fn drop(&mut self) {
        match self.driver.enable_module(self.dir, false) {
            Ok(()) => info!(dir = %self.dir, "module disabled"),
            Err(status) => error!(
                dir = %self.dir,
                code = status.0,
                reason = %self.driver.strerror(status),
                "failed to disable module"
            ),
        }
    }
}

/// Receive half of the capability table
pub struct RxChannel<D: Driver> {
    tuner: Tuner<D>,
    extractor: PhaseExtractor,
}

impl<D: Driver> RxChannel<D> {
    /// The next phase-aligned window, if one became ready since the last call.
    /// Must be called more often than the stream fills half the ring.
    pub fn process_one_buffer(&mut self) -> Option<Snapshot<'_>> {
        self.extractor.poll()
    }

    pub fn phase(&self) -> Phase {
        self.extractor.phase()
    }

    /// Components in every window
    pub fn window_len(&self) -> usize {
        self.extractor.window_len()
    }
}

impl<D: Driver> Tunable for RxChannel<D> {
    type Driver = D;

    fn tuner(&self) -> &Tuner<D> {
        &self.tuner
    }

    fn tuner_mut(&mut self) -> &mut Tuner<D> {
        &mut self.tuner
    }
}

/// Transmit half of the capability table
pub struct TxChannel<D: Driver> {
    tuner: Tuner<D>,
    block: TxBlock,
    timeout_ms: u32,
    stats: Arc<CaptureStats>,
}

impl<D: Driver> TxChannel<D> {
    /// Send one block carrying `payload` right-aligned
    pub fn process_one_buffer(&mut self, payload: &[i8]) -> Result<()> {
        let samples = self.block.fill(payload)?;
        let driver = self.tuner.driver();
        check(&**driver, "sync_tx", driver.sync_tx(samples, self.timeout_ms))?;
        self.stats.record_tx();
        Ok(())
    }

    /// Largest payload one block can carry, in components
    pub fn max_payload(&self) -> usize {
        self.block.capacity()
    }
}

impl<D: Driver> Tunable for TxChannel<D> {
    type Driver = D;

    fn tuner(&self) -> &Tuner<D> {
        &self.tuner
    }

    fn tuner_mut(&mut self) -> &mut Tuner<D> {
        &mut self.tuner
    }
}

/// A configured, running radio
pub struct Radio<D: Driver> {
    rx: Option<RxChannel<D>>,
    tx: Option<TxChannel<D>>,
    capture: Option<CaptureThread>,
    rx_stream: Option<StreamGuard<D>>,
    rx_module: Option<ModuleGuard<D>>,
    tx_module: Option<ModuleGuard<D>>,
    device: Option<DeviceGuard<D>>,
    stop: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
}

/// Bring up `driver` as described by `config` and start capturing.
///
/// `stop` is the process-wide flag; raising it ends the receive stream.
pub fn configure_and_run<D: Driver>(
    driver: D,
    config: &RadioConfig,
    stop: Arc<AtomicBool>,
) -> Result<Radio<D>> {
    config.check_geometry()?;
    let ring = Arc::new(SampleRing::new(config.ring_capacity, config.ring_margin)?);
    let pool = BufferPool::new(config.pool_buffers)?;
    let stats = Arc::new(CaptureStats::default());
    let driver = Arc::new(driver);

    let device = DeviceGuard::open(driver.clone())?;
    if check(&*driver, "is_fpga_configured", driver.is_fpga_configured())? {
        info!("FPGA is loaded");
    } else {
        error!("FPGA is not loaded");
        return Err(RadioError::FpgaNotLoaded);
    }

    for (dir, c) in config.directions() {
        check(&*driver, "set_frequency", driver.set_frequency(dir, c.frequency))?;
        info!(%dir, frequency = c.frequency, "frequency set");
    }
    for (dir, c) in config.directions() {
        let actual = check(
            &*driver,
            "set_sample_rate",
            driver.set_sample_rate(dir, c.sample_rate),
        )?;
        info!(%dir, requested = c.sample_rate, actual, "sample rate set");
    }
    for (dir, c) in config.directions() {
        let actual = check(&*driver, "set_bandwidth", driver.set_bandwidth(dir, c.bandwidth))?;
        info!(%dir, requested = c.bandwidth, actual, "bandwidth set");
    }
    for (dir, c) in config.directions() {
        let gain = c.gain.unwrap_or_else(|| default_gain(dir));
        check(&*driver, "set_gain", driver.set_gain(dir, gain))?;
        info!(%dir, gain, "gain set");
    }

    // Locals drop in reverse declaration order, which has to match teardown
    let mut tx_module = None;
    let mut rx_module = None;
    let mut rx_stream = None;
    let mut capture = None;

    if config.rx.enabled {
        let halt = Arc::new(AtomicBool::new(false));
        let engine = CaptureEngine::new(
            ring.clone(),
            pool,
            stop.clone(),
            halt.clone(),
            stats.clone(),
        );
        let geometry = StreamGeometry {
            num_buffers: config.pool_buffers,
            samples_per_buffer: config.rx_buffer_samples,
            num_transfers: config.pool_buffers,
        };
        check(&*driver, "init_stream", driver.init_stream(geometry, Box::new(engine)))?;
        rx_stream = Some(StreamGuard {
            driver: driver.clone(),
        });
        info!(?geometry, "RX stream initialized");

        check(
            &*driver,
            "set_stream_timeout",
            driver.set_stream_timeout(Direction::Rx, config.rx_timeout_ms),
        )?;
        rx_module = Some(ModuleGuard::enable(driver.clone(), Direction::Rx)?);
        capture = Some(CaptureThread::spawn(driver.clone(), halt)?);
    }

    if config.tx.enabled {
        let geometry = SyncGeometry {
            num_buffers: TX_SYNC_BUFFERS,
            buffer_size: TX_BLOCK_SAMPLES,
            num_transfers: TX_SYNC_TRANSFERS,
            timeout_ms: config.tx_timeout_ms,
        };
        check(&*driver, "sync_config", driver.sync_config(Direction::Tx, geometry))?;
        debug!(?geometry, "TX sync session configured");
        tx_module = Some(ModuleGuard::enable(driver.clone(), Direction::Tx)?);
    }

    let rx = config.rx.enabled.then(|| RxChannel {
        tuner: Tuner::new(driver.clone(), Direction::Rx, config.rx.tuning(DEFAULT_RX_GAIN)),
        extractor: PhaseExtractor::new(ring.clone(), stats.clone()),
    });
    let tx = config.tx.enabled.then(|| TxChannel {
        tuner: Tuner::new(driver.clone(), Direction::Tx, config.tx.tuning(DEFAULT_TX_GAIN)),
        block: TxBlock::default(),
        timeout_ms: config.tx_timeout_ms,
        stats: stats.clone(),
    });

    info!(rx = config.rx.enabled, tx = config.tx.enabled, "radio running");
    Ok(Radio {
        rx,
        tx,
        capture,
        rx_stream,
        rx_module,
        tx_module,
        device: Some(device),
        stop,
        stats,
    })
}

impl<D: Driver> Radio<D> {
    pub fn rx(&mut self) -> Result<&mut RxChannel<D>> {
        self.rx
            .as_mut()
            .ok_or(RadioError::DirectionDisabled(Direction::Rx))
    }

    pub fn tx(&mut self) -> Result<&mut TxChannel<D>> {
        self.tx
            .as_mut()
            .ok_or(RadioError::DirectionDisabled(Direction::Tx))
    }

    /// The process-wide stop flag this radio watches
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn stats(&self) -> StatsReport {
        self.stats.report()
    }

    /// Stop capturing and release the device
    pub fn stop_and_close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.device.is_none() {
            return;
        }
        info!("stopping radio");
        // The stream session must outlive the thread running it
        if let Some(capture) = self.capture.take() {
            capture.join();
        }
        self.rx_stream.take();
        self.rx_module.take();
        self.tx_module.take();
        self.device.take();
    }
}

impl<D: Driver> Drop for Radio<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

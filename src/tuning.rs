//! Per-direction tuning state and the update contract shared by both
//! directions.
//!
//! Every `update_*` takes an `Option`: `None` only reads the cached value,
//! the cached value itself is a no-op, anything else goes to the backend and
//! is cached only once the backend accepts it.

use std::fmt::Debug;
use std::sync::Arc;

use tracing::{debug, info};

use crate::driver::{check, Direction, Driver, DriverResult};
use crate::error::Result;

/// Current settings of one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tuning {
    pub enabled: bool,
    /// Center frequency in Hz
    pub frequency: u64,
    /// Samples per second
    pub sample_rate: u32,
    /// Analog bandwidth in Hz
    pub bandwidth: u32,
    pub gain: i32,
}

/// One direction's tuning bound to a backend
pub struct Tuner<D: Driver> {
    driver: Arc<D>,
    direction: Direction,
    current: Tuning,
}

impl<D: Driver> Tuner<D> {
    pub(crate) fn new(driver: Arc<D>, direction: Direction, current: Tuning) -> Self {
        Self {
            driver,
            direction,
            current,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn tuning(&self) -> Tuning {
        self.current
    }

    pub(crate) fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn update_frequency(&mut self, hz: Option<u64>) -> Result<u64> {
        let dir = self.direction;
        update(
            &*self.driver,
            "set_frequency",
            dir,
            hz,
            &mut self.current.frequency,
            |d, hz| d.set_frequency(dir, hz),
        )
    }

    pub fn update_gain(&mut self, gain: Option<i32>) -> Result<i32> {
        let dir = self.direction;
        update(
            &*self.driver,
            "set_gain",
            dir,
            gain,
            &mut self.current.gain,
            |d, gain| d.set_gain(dir, gain),
        )
    }

    pub fn update_sample_rate(&mut self, rate: Option<u32>) -> Result<u32> {
        let dir = self.direction;
        update(
            &*self.driver,
            "set_sample_rate",
            dir,
            rate,
            &mut self.current.sample_rate,
            |d, rate| {
                let actual = d.set_sample_rate(dir, rate)?;
                debug!(%dir, rate, actual, "sample rate set");
                Ok(())
            },
        )
    }

    pub fn update_bandwidth(&mut self, bandwidth: Option<u32>) -> Result<u32> {
        let dir = self.direction;
        update(
            &*self.driver,
            "set_bandwidth",
            dir,
            bandwidth,
            &mut self.current.bandwidth,
            |d, bw| {
                let actual = d.set_bandwidth(dir, bw)?;
                debug!(%dir, bandwidth = bw, actual, "bandwidth set");
                Ok(())
            },
        )
    }
}

fn update<D, T, F>(
    driver: &D,
    op: &'static str,
    dir: Direction,
    requested: Option<T>,
    current: &mut T,
    apply: F,
) -> Result<T>
where
    D: Driver,
    T: Copy + PartialEq + Debug,
    F: FnOnce(&D, T) -> DriverResult<()>,
{
    let value = match requested {
        Some(v) if v != *current => v,
        _ => return Ok(*current),
    };
    check(driver, op, apply(driver, value))?;
    info!(%dir, op, ?value, "updated");
    *current = value;
    Ok(value)
}

/// The tuning half of a direction's capability table
pub trait Tunable {
    type Driver: Driver;

    fn tuner(&self) -> &Tuner<Self::Driver>;
    fn tuner_mut(&mut self) -> &mut Tuner<Self::Driver>;

    fn tuning(&self) -> Tuning {
        self.tuner().tuning()
    }

    fn update_frequency(&mut self, hz: Option<u64>) -> Result<u64> {
        self.tuner_mut().update_frequency(hz)
    }

    fn update_gain(&mut self, gain: Option<i32>) -> Result<i32> {
        self.tuner_mut().update_gain(gain)
    }

    fn update_sample_rate(&mut self, rate: Option<u32>) -> Result<u32> {
        self.tuner_mut().update_sample_rate(rate)
    }

    fn update_bandwidth(&mut self, bandwidth: Option<u32>) -> Result<u32> {
        self.tuner_mut().update_bandwidth(bandwidth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RadioError;
    use crate::sim::{Call, Op, SimDriver, ERR_RANGE};

    fn tuner() -> (Arc<SimDriver>, Tuner<SimDriver>) {
        let sim = Arc::new(SimDriver::new());
        let tuning = Tuning {
            enabled: true,
            frequency: 2_402_000_000,
            sample_rate: 4_000_000,
            bandwidth: 4_000_000,
            gain: 40,
        };
        (sim.clone(), Tuner::new(sim, Direction::Rx, tuning))
    }

    #[test]
    fn test_query_has_no_side_effects() {
        let (sim, mut tuner) = tuner();
        assert_eq!(tuner.update_frequency(None).unwrap(), 2_402_000_000);
        assert_eq!(tuner.update_gain(None).unwrap(), 40);
        assert_eq!(tuner.update_sample_rate(None).unwrap(), 4_000_000);
        assert_eq!(tuner.update_bandwidth(None).unwrap(), 4_000_000);
        assert!(sim.calls().is_empty());
    }

    #[test]
    fn test_same_value_is_noop() {
        let (sim, mut tuner) = tuner();
        assert_eq!(tuner.update_frequency(Some(2_402_000_000)).unwrap(), 2_402_000_000);
        assert_eq!(tuner.update_gain(Some(40)).unwrap(), 40);
        assert!(sim.calls().is_empty());
    }

    #[test]
    fn test_new_value_reaches_backend() {
        let (sim, mut tuner) = tuner();
        assert_eq!(tuner.update_frequency(Some(2_426_000_000)).unwrap(), 2_426_000_000);
        assert_eq!(tuner.update_bandwidth(Some(2_000_000)).unwrap(), 2_000_000);
        assert_eq!(tuner.tuning().frequency, 2_426_000_000);
        assert_eq!(tuner.tuning().bandwidth, 2_000_000);
        assert_eq!(
            sim.calls(),
            vec![
                Call::SetFrequency(Direction::Rx, 2_426_000_000),
                Call::SetBandwidth(Direction::Rx, 2_000_000),
            ]
        );
        // Applying it again is now the no-op
        tuner.update_frequency(Some(2_426_000_000)).unwrap();
        assert_eq!(sim.calls().len(), 2);
    }

    #[test]
    fn test_failure_keeps_cached_value() {
        let (sim, mut tuner) = tuner();
        sim.fail(Op::SetGain(Direction::Rx), ERR_RANGE);
        let err = tuner.update_gain(Some(90)).unwrap_err();
        assert!(matches!(err, RadioError::Hardware { op: "set_gain", .. }));
        assert_eq!(err.status(), Some(ERR_RANGE.0));
        assert_eq!(tuner.tuning().gain, 40);
        assert_eq!(tuner.update_gain(None).unwrap(), 40);
    }
}

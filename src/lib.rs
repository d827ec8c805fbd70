//! Radio front-end for a BLE sniffer: continuous IQ capture into a cyclic
//! buffer, phase-aligned snapshots for the demodulator, and block transmit.

pub mod args;
pub mod capture;
pub mod complex;
pub mod driver;
pub mod error;
pub mod exfil;
pub mod monitoring;
pub mod phase;
pub mod radio;
pub mod ring;
pub mod sim;
pub mod tuning;
pub mod tx;

#[cfg(feature = "bladerf")]
pub mod bladerf;

pub use driver::{Direction, Driver, Status};
pub use error::{RadioError, Result};
pub use radio::{configure_and_run, DirectionConfig, Radio, RadioConfig};

/// One stored IQ component, after reduction to the canonical 8-bit width
pub type IqType = i8;

pub const SAMPLE_PER_SYMBOL: usize = 4;
// 4096 IQ pairs is ~1ms at 4Msps
pub const LEN_BUF_IN_SAMPLE: usize = 4 * 4096;
/// Ring capacity in components (I and Q counted separately)
pub const LEN_BUF: usize = LEN_BUF_IN_SAMPLE * 2;
pub const MAX_NUM_PHY_BYTE: usize = 47;
pub const MAX_NUM_PHY_SAMPLE: usize = MAX_NUM_PHY_BYTE * 8 * SAMPLE_PER_SYMBOL;
/// Lookahead past each half-buffer, long enough to hold the longest packet
pub const LEN_BUF_MAX_NUM_PHY_SAMPLE: usize = 2 * MAX_NUM_PHY_SAMPLE;
/// Components in every emitted snapshot
pub const LEN_WINDOW: usize = LEN_BUF / 2 + LEN_BUF_MAX_NUM_PHY_SAMPLE;

/// IQ pairs per receive buffer: a quarter of the ring, so every watch-point
/// is crossed at a block boundary
pub const RX_BUFFER_SAMPLES: usize = LEN_BUF / 8;

/// IQ pairs per transmitted block
pub const TX_BLOCK_SAMPLES: usize = 4096;
/// Widening factor from payload bytes to the SC16 Q11 range
pub const TX_SCALE: i16 = 16;

pub const DEFAULT_RX_GAIN: i32 = 66;
pub const DEFAULT_TX_GAIN: i32 = 57;
pub const DEFAULT_POOL_BUFFERS: usize = 2;
pub const DEFAULT_RX_TIMEOUT_MS: u32 = 100;
pub const DEFAULT_TX_TIMEOUT_MS: u32 = 10;

/// Reduce one native SC16 Q11 component to the stored width
#[inline]
pub fn to_canonical(component: i16) -> IqType {
    // Q11 occupies 12 bits, keep the top 8
    ((component >> 4) & 0xFF) as u8 as IqType
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_width() {
        assert_eq!(to_canonical(2047), 127);
        assert_eq!(to_canonical(-2048), -128);
        assert_eq!(to_canonical(16), 1);
        assert_eq!(to_canonical(-16), -1);
        assert_eq!(to_canonical(15), 0);
    }

    #[test]
    fn test_window_fits_shadow() {
        assert!(LEN_BUF.is_power_of_two());
        assert!(LEN_BUF_MAX_NUM_PHY_SAMPLE % 2 == 0);
        assert!(LEN_BUF_MAX_NUM_PHY_SAMPLE < LEN_BUF / 2);
        assert_eq!(LEN_WINDOW, LEN_BUF / 2 + LEN_BUF_MAX_NUM_PHY_SAMPLE);
        // libbladeRF wants buffers in multiples of 1024 samples
        assert_eq!(RX_BUFFER_SAMPLES % 1024, 0);
    }
}

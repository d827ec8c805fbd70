//! Error types for the radio front-end

use thiserror::Error;

use crate::driver::Direction;

pub type Result<T> = std::result::Result<T, RadioError>;

#[derive(Error, Debug)]
pub enum RadioError {
    /// A backend call returned a non-zero status
    #[error("{op} failed with status {code}: {reason}")]
    Hardware {
        op: &'static str,
        code: i32,
        reason: String,
    },

    /// The device answered but has no FPGA image loaded
    #[error("FPGA is not loaded")]
    FpgaNotLoaded,

    #[error("{0} is not enabled on this radio")]
    DirectionDisabled(Direction),

    #[error("payload of {len} components exceeds the {max} component TX block")]
    PayloadTooLong { len: usize, max: usize },

    #[error("invalid buffer geometry: {0}")]
    Geometry(String),

    #[error("failed to start capture thread: {0}")]
    Thread(#[from] std::io::Error),

    #[error("snapshot dump failed: {0}")]
    Dump(#[source] std::io::Error),
}

impl RadioError {
    /// Status code reported by the backend, if this came from one
    pub fn status(&self) -> Option<i32> {
        match self {
            RadioError::Hardware { code, .. } => Some(*code),
            _ => None,
        }
    }
}

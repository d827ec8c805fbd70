//! Building outbound blocks in the backend's native SC16 Q11 format

use crate::error::{RadioError, Result};
use crate::{TX_BLOCK_SAMPLES, TX_SCALE};

/// One reusable transmit block of `2 * samples` interleaved components
#[derive(Debug, Clone)]
pub struct TxBlock {
    buf: Box<[i16]>,
}

impl TxBlock {
    pub fn new(samples: usize) -> Self {
        Self {
            buf: vec![0; samples * 2].into_boxed_slice(),
        }
    }

    /// Components the block holds
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// IQ pairs the block holds
    pub fn samples(&self) -> usize {
        self.buf.len() / 2
    }

    /// Zero the block and right-align `payload` in it, widening each byte by
    /// [`TX_SCALE`]. The leading slots stay zero.
    pub fn fill(&mut self, payload: &[i8]) -> Result<&[i16]> {
        let len = payload.len();
        if len > self.buf.len() {
            return Err(RadioError::PayloadTooLong {
                len,
                max: self.buf.len(),
            });
        }
        let pad = self.buf.len() - len;
        self.buf[..pad].fill(0);
        for (slot, &byte) in self.buf[pad..].iter_mut().zip(payload) {
            *slot = byte as i16 * TX_SCALE;
        }
        Ok(&self.buf[..])
    }
}

impl Default for TxBlock {
    fn default() -> Self {
        Self::new(TX_BLOCK_SAMPLES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    #[test]
    fn test_payload_right_aligned_and_scaled() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut block = TxBlock::default();
        for len in [0, 1, 2, 301, 2 * TX_BLOCK_SAMPLES - 1, 2 * TX_BLOCK_SAMPLES] {
            let payload: Vec<i8> = (0..len).map(|_| rng.gen()).collect();
            let out = block.fill(&payload).unwrap();
            assert_eq!(out.len(), 2 * TX_BLOCK_SAMPLES);
            let pad = out.len() - len;
            assert!(out[..pad].iter().all(|&v| v == 0));
            for (o, p) in out[pad..].iter().zip(&payload) {
                assert_eq!(*o, *p as i16 * 16);
            }
        }
    }

    #[test]
    fn test_stale_payload_cleared() {
        let mut block = TxBlock::new(4);
        block.fill(&[1; 8]).unwrap();
        assert_eq!(block.fill(&[-128, 127]).unwrap(), &[0i16, 0, 0, 0, 0, 0, -2048, 2032]);
    }

    #[test]
    fn test_oversize_payload_rejected() {
        let mut block = TxBlock::new(2);
        let err = block.fill(&[0; 5]).unwrap_err();
        assert!(matches!(err, RadioError::PayloadTooLong { len: 5, max: 4 }));
    }
}

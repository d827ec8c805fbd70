//! The cyclic sample buffer shared by the capture thread and the extractor.
//!
//! Storage is `capacity + margin` components. The tail margin shadows the
//! first `margin` components so a window that starts in the upper half can be
//! read contiguously across the wrap point.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{RadioError, Result};
use crate::{to_canonical, IqType, LEN_BUF, LEN_BUF_MAX_NUM_PHY_SAMPLE};

pub struct SampleRing {
    storage: Mutex<Box<[IqType]>>,
    // Only the writer stores; published after every block
    cursor: AtomicUsize,
    // Components ever written, published with the cursor
    written: AtomicU64,
    capacity: usize,
    margin: usize,
}

impl SampleRing {
    /// Ring of `capacity` components with a `margin` component shadow region
    pub fn new(capacity: usize, margin: usize) -> Result<Self> {
        if capacity < 4 || !capacity.is_power_of_two() {
            return Err(RadioError::Geometry(format!(
                "capacity {} is not a power of two >= 4",
                capacity
            )));
        }
        if margin % 2 != 0 || margin >= capacity / 2 {
            return Err(RadioError::Geometry(format!(
                "margin {} must be even and below half of capacity {}",
                margin, capacity
            )));
        }
        Ok(Self {
            storage: Mutex::new(vec![0; capacity + margin].into_boxed_slice()),
            cursor: AtomicUsize::new(0),
            written: AtomicU64::new(0),
            capacity,
            margin,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn margin(&self) -> usize {
        self.margin
    }

    /// Last published write position, always in `[0, capacity)` and even
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Components written since creation
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    /// Append interleaved SC16 components at the cursor. Must only be called
    /// from the single capture thread. Returns the number of IQ pairs stored.
    pub fn write(&self, block: &[i16]) -> usize {
        let mask = self.capacity - 1;
        let mut storage = self.storage();
        let mut cursor = self.cursor.load(Ordering::Relaxed);
        let mut pairs = 0;
        for iq in block.chunks_exact(2) {
            storage[cursor] = to_canonical(iq[0]);
            storage[cursor + 1] = to_canonical(iq[1]);
            cursor = (cursor + 2) & mask;
            pairs += 1;
        }
        self.written.fetch_add(2 * pairs as u64, Ordering::Release);
        self.cursor.store(cursor, Ordering::Release);
        pairs
    }

    /// Take the buffer lock for reads that must not race the writer
    pub fn lock(&self) -> RingGuard<'_> {
        RingGuard {
            storage: self.storage(),
            capacity: self.capacity,
            margin: self.margin,
        }
    }

    fn storage(&self) -> MutexGuard<'_, Box<[IqType]>> {
        // Plain bytes, nothing a panicking writer could leave inconsistent
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SampleRing {
    fn default() -> Self {
        Self {
            storage: Mutex::new(vec![0; LEN_BUF + LEN_BUF_MAX_NUM_PHY_SAMPLE].into_boxed_slice()),
            cursor: AtomicUsize::new(0),
            written: AtomicU64::new(0),
            capacity: LEN_BUF,
            margin: LEN_BUF_MAX_NUM_PHY_SAMPLE,
        }
    }
}

/// Locked access to the ring storage
pub struct RingGuard<'a> {
    storage: MutexGuard<'a, Box<[IqType]>>,
    capacity: usize,
    margin: usize,
}

impl RingGuard<'_> {
    /// Copy the first `margin` components into the shadow region past the end
    pub fn mirror_head(&mut self) {
        let (head, tail) = self.storage.split_at_mut(self.capacity);
        tail.copy_from_slice(&head[..self.margin]);
    }

    /// `length` components starting at `offset`. The read may run into the
    /// shadow region but never past it.
    pub fn snapshot_window(&self, offset: usize, length: usize) -> &[IqType] {
        debug_assert!(offset + length <= self.capacity + self.margin);
        &self.storage[offset..offset + length]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    /// SC16 component that reduces to `v`
    fn native(v: i8) -> i16 {
        (v as i16) << 4
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(SampleRing::new(100, 8).is_err());
        assert!(SampleRing::new(64, 7).is_err());
        assert!(SampleRing::new(64, 32).is_err());
        assert!(SampleRing::new(64, 8).is_ok());
    }

    #[test]
    fn test_write_reduces_and_advances() {
        let ring = SampleRing::new(16, 4).unwrap();
        let n = ring.write(&[native(1), native(-1), native(2), native(-2)]);
        assert_eq!(n, 2);
        assert_eq!(ring.cursor(), 4);
        let guard = ring.lock();
        assert_eq!(guard.snapshot_window(0, 4), &[1i8, -1, 2, -2]);
    }

    #[test]
    fn test_unpaired_component_dropped() {
        let ring = SampleRing::new(16, 4).unwrap();
        assert_eq!(ring.write(&[native(1), native(1), native(1)]), 1);
        assert_eq!(ring.cursor(), 2);
    }

    #[test]
    fn test_full_lap_returns_cursor() {
        let ring = SampleRing::new(64, 8).unwrap();
        ring.write(&[0i16; 6]);
        let start = ring.cursor();
        ring.write(&vec![0i16; 64]);
        assert_eq!(ring.cursor(), start);
    }

    #[test]
    fn test_cursor_bounded_for_any_blocks() {
        let mut rng = StdRng::seed_from_u64(7);
        let ring = SampleRing::new(256, 16).unwrap();
        let mut written = 0usize;
        for _ in 0..500 {
            let pairs = rng.gen_range(0..300);
            ring.write(&vec![0i16; pairs * 2]);
            written += pairs * 2;
            let cursor = ring.cursor();
            assert!(cursor < ring.capacity());
            assert_eq!(cursor % 2, 0);
            assert_eq!(cursor, written % ring.capacity());
            assert_eq!(ring.written(), written as u64);
        }
    }

    #[test]
    fn test_mirror_makes_wrap_contiguous() {
        let ring = SampleRing::new(16, 4).unwrap();
        let block: Vec<i16> = (0..16).map(|v| native(v as i8)).collect();
        ring.write(&block);
        // Wrap and overwrite the head
        let head: Vec<i16> = (100..104).map(|v| native(v as i8)).collect();
        ring.write(&head);
        let mut guard = ring.lock();
        guard.mirror_head();
        let window = guard.snapshot_window(8, 12);
        assert_eq!(
            window,
            &[8i8, 9, 10, 11, 12, 13, 14, 15, 100, 101, 102, 103]
        );
    }

    #[test]
    fn test_default_geometry() {
        let ring = SampleRing::default();
        assert_eq!(ring.capacity(), LEN_BUF);
        assert_eq!(ring.margin(), LEN_BUF_MAX_NUM_PHY_SAMPLE);
        assert_eq!(ring.cursor(), 0);
    }
}

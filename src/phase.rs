//! Phase-synchronized snapshot extraction.
//!
//! The extractor watches the ring's published cursor. Each time the cursor
//! has moved a full window past one of the two watch-points it copies that
//! window out and flips its phase:
//!
//! ```text
//!  cursor - margin in [half, cap)  and phase == LowerHalf  ->  window at 0
//!  cursor - margin in [0, half)    and phase == UpperHalf  ->  window at half
//! ```
//!
//! A window is half the ring plus `margin` components of lookahead, so the
//! one starting at `half` runs through the shadow region, which is refreshed
//! from the head just before the copy.
//!
//! Polling is lock-free until a watch-point is crossed. A consumer that does
//! not poll while the cursor sits in a watch region misses that half-buffer;
//! the gap is counted in [`CaptureStats`] but never reported as an error.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::complex::{pairs, ComplexByte};
use crate::monitoring::CaptureStats;
use crate::ring::SampleRing;
use crate::IqType;

/// Which half of the ring was last delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    LowerHalf,
    UpperHalf,
}

/// A window copied out of the ring, valid until the next poll
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    /// Ring offset the window starts at (0 or half the capacity)
    pub start: usize,
    samples: &'a [IqType],
    lookahead: usize,
}

impl<'a> Snapshot<'a> {
    /// Interleaved components in logical order
    pub fn samples(&self) -> &'a [IqType] {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = ComplexByte> + 'a {
        pairs(self.samples)
    }

    /// Trailing components that overlap the start of the next window
    pub fn lookahead(&self) -> &'a [IqType] {
        &self.samples[self.samples.len() - self.lookahead..]
    }
}

pub struct PhaseExtractor {
    ring: Arc<SampleRing>,
    stats: Arc<CaptureStats>,
    phase: Phase,
    window: Box<[IqType]>,
    // Index of the watch-point crossing delivered last
    last_crossing: Option<u64>,
}

impl PhaseExtractor {
    pub fn new(ring: Arc<SampleRing>, stats: Arc<CaptureStats>) -> Self {
        let len = ring.capacity() / 2 + ring.margin();
        Self {
            ring,
            stats,
            phase: Phase::LowerHalf,
            window: vec![0; len].into_boxed_slice(),
            last_crossing: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Components in every emitted window
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Returns the next window if the cursor crossed a watch-point since the
    /// last emission
    pub fn poll(&mut self) -> Option<Snapshot<'_>> {
        let half = self.ring.capacity() / 2;
        let margin = self.ring.margin();
        let cursor_ahead = self.ring.cursor() as isize - margin as isize;

        let start = match self.phase {
            Phase::UpperHalf if cursor_ahead >= 0 && cursor_ahead < half as isize => half,
            Phase::LowerHalf if cursor_ahead >= half as isize => 0,
            _ => return None,
        };

        let written = {
            let mut ring = self.ring.lock();
            if start == half {
                ring.mirror_head();
            }
            self.window
                .copy_from_slice(ring.snapshot_window(start, self.window.len()));
            // Stable while we hold the lock
            self.ring.written()
        };
        self.phase = match self.phase {
            Phase::LowerHalf => Phase::UpperHalf,
            Phase::UpperHalf => Phase::LowerHalf,
        };
        self.account(written, margin as u64, half as u64);
        trace!(start, phase = ?self.phase, "window ready");

        Some(Snapshot {
            start,
            samples: &self.window,
            lookahead: margin,
        })
    }

    fn account(&mut self, written: u64, margin: u64, half: u64) {
        self.stats.record_window();
        // Crossing k happens once `margin + k * half` components are written.
        // Any crossing between the last delivered one and this went by unseen.
        let crossing = written.saturating_sub(margin) / half;
        if let Some(last) = self.last_crossing {
            let skipped = crossing.saturating_sub(last + 1);
            if skipped > 0 {
                warn!(skipped, "consumer polled too slowly");
                self.stats.record_skip(skipped);
            }
        }
        self.last_crossing = Some(crossing);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: usize = 64;
    const MARGIN: usize = 8;
    const HALF: usize = CAP / 2;

    fn setup() -> (Arc<SampleRing>, Arc<CaptureStats>, PhaseExtractor) {
        let ring = Arc::new(SampleRing::new(CAP, MARGIN).unwrap());
        let stats = Arc::new(CaptureStats::default());
        let extractor = PhaseExtractor::new(ring.clone(), stats.clone());
        (ring, stats, extractor)
    }

    /// Components numbered from zero, reduced modulo 97 so they fit a byte
    fn counting_block(first: usize, len: usize) -> Vec<i16> {
        (first..first + len).map(|k| ((k % 97) as i16) << 4).collect()
    }

    /// Write `total` components in `step` sized blocks, polling after each,
    /// and return the start of every emitted window
    fn drive(step: usize, total: usize) -> Vec<usize> {
        let (ring, _, mut extractor) = setup();
        let mut starts = Vec::new();
        let mut k = 0;
        while k < total {
            ring.write(&counting_block(k, step));
            k += step;
            if let Some(snap) = extractor.poll() {
                starts.push(snap.start);
            }
        }
        starts
    }

    #[test]
    fn test_not_ready_until_first_window_written() {
        let (ring, _, mut extractor) = setup();
        ring.write(&counting_block(0, HALF + MARGIN - 2));
        assert!(extractor.poll().is_none());
        assert_eq!(extractor.phase(), Phase::LowerHalf);
        ring.write(&counting_block(HALF + MARGIN - 2, 2));
        let snap = extractor.poll().unwrap();
        assert_eq!(snap.start, 0);
        assert_eq!(snap.len(), HALF + MARGIN);
        assert_eq!(extractor.phase(), Phase::UpperHalf);
        // No second window for the same crossing
        assert!(extractor.poll().is_none());
    }

    #[test]
    fn test_phase_alternates_once_per_half() {
        let starts = drive(2, 4 * CAP);
        // First window at cursor 40, then every 32 components
        assert_eq!(starts, vec![0, HALF, 0, HALF, 0, HALF, 0]);
    }

    #[test]
    fn test_granularity_does_not_change_transitions() {
        let by_pair = drive(2, 6 * CAP);
        assert_eq!(drive(4, 6 * CAP), by_pair);
        assert_eq!(drive(MARGIN, 6 * CAP), by_pair);
    }

    #[test]
    fn test_windows_contiguous_across_wrap() {
        let (ring, _, mut extractor) = setup();
        let mut k = 0;
        let mut checked = 0;
        while k < 5 * CAP {
            ring.write(&counting_block(k, 2));
            k += 2;
            if let Some(snap) = extractor.poll() {
                let samples = snap.samples();
                assert_eq!(samples.len(), HALF + MARGIN);
                for w in samples.windows(2) {
                    assert_eq!((w[0] as i32 + 1) % 97, w[1] as i32);
                }
                // The window ends right at the cursor
                let last = ((k - 1) % 97) as i8;
                assert_eq!(*samples.last().unwrap(), last);
                assert_eq!(snap.lookahead().len(), MARGIN);
                assert_eq!(snap.pairs().count(), (HALF + MARGIN) / 2);
                checked += 1;
            }
        }
        assert!(checked >= 8);
    }

    #[test]
    fn test_slow_consumer_skips_are_counted() {
        let (ring, stats, mut extractor) = setup();
        ring.write(&counting_block(0, HALF + MARGIN));
        assert_eq!(extractor.poll().unwrap().start, 0);
        // A full lap goes by without a poll in the watch region
        ring.write(&counting_block(0, CAP));
        assert!(extractor.poll().is_none());
        ring.write(&counting_block(0, HALF));
        assert_eq!(extractor.poll().unwrap().start, HALF);
        let report = stats.report();
        assert_eq!(report.windows, 2);
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn test_late_poll_inside_region_is_not_a_skip() {
        let (ring, stats, mut extractor) = setup();
        // First slot that releases the window at 0
        ring.write(&counting_block(0, HALF + MARGIN));
        assert_eq!(extractor.poll().unwrap().start, 0);
        ring.write(&counting_block(0, HALF));
        assert_eq!(extractor.poll().unwrap().start, HALF);
        // Last slot before the wrap, almost a full ring later
        ring.write(&counting_block(0, CAP - 2 - MARGIN));
        assert_eq!(ring.cursor(), CAP - 2);
        assert_eq!(extractor.poll().unwrap().start, 0);
        let report = stats.report();
        assert_eq!(report.windows, 3);
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn test_missed_lap_after_late_poll_counts_both_halves() {
        let (ring, stats, mut extractor) = setup();
        ring.write(&counting_block(0, HALF + MARGIN));
        assert_eq!(extractor.poll().unwrap().start, 0);
        // Late in the region that releases the window at half
        ring.write(&counting_block(0, CAP - 2));
        assert_eq!(extractor.poll().unwrap().start, HALF);
        // A lap without polling, then back into the lower watch region
        ring.write(&counting_block(0, CAP));
        ring.write(&counting_block(0, 2));
        assert_eq!(extractor.poll().unwrap().start, 0);
        let report = stats.report();
        assert_eq!(report.windows, 3);
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn test_default_geometry_late_poll_is_not_a_skip() {
        let ring = Arc::new(SampleRing::default());
        let stats = Arc::new(CaptureStats::default());
        let mut extractor = PhaseExtractor::new(ring.clone(), stats.clone());
        let half = ring.capacity() / 2;
        let margin = ring.margin();
        for len in [half + margin, half, ring.capacity() - 2 - margin] {
            ring.write(&vec![0i16; len]);
            assert!(extractor.poll().is_some());
        }
        assert_eq!(stats.report().skipped, 0);
    }
}

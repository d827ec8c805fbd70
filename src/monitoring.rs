//! Runtime counters for the capture pipeline. The capture thread and the
//! consumer bump these without locking; anyone holding the `Arc` can take a
//! [`StatsReport`] at any time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CaptureStats {
    blocks: AtomicU64,
    empty_blocks: AtomicU64,
    components: AtomicU64,
    windows: AtomicU64,
    skipped: AtomicU64,
    tx_blocks: AtomicU64,
}

impl CaptureStats {
    pub(crate) fn record_block(&self, components: usize) {
        if components == 0 {
            self.empty_blocks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.blocks.fetch_add(1, Ordering::Relaxed);
            self.components
                .fetch_add(components as u64, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_window(&self) {
        self.windows.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skip(&self, halves: u64) {
        self.skipped.fetch_add(halves, Ordering::Relaxed);
    }

    pub(crate) fn record_tx(&self) {
        self.tx_blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Components delivered by the driver so far
    pub fn components(&self) -> u64 {
        self.components.load(Ordering::Relaxed)
    }

    pub fn report(&self) -> StatsReport {
        StatsReport {
            blocks: self.blocks.load(Ordering::Relaxed),
            empty_blocks: self.empty_blocks.load(Ordering::Relaxed),
            components: self.components.load(Ordering::Relaxed),
            windows: self.windows.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            tx_blocks: self.tx_blocks.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CaptureStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsReport {
    pub blocks: u64,
    pub empty_blocks: u64,
    pub components: u64,
    pub windows: u64,
    /// Half-buffers the consumer polled too slowly to see
    pub skipped: u64,
    pub tx_blocks: u64,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "blocks: {} ({} empty) samples: {} windows: {} skipped: {} tx: {}",
            self.blocks,
            self.empty_blocks,
            self.components / 2,
            self.windows,
            self.skipped,
            self.tx_blocks
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report() {
        let stats = CaptureStats::default();
        stats.record_block(8);
        stats.record_block(0);
        stats.record_window();
        stats.record_skip(2);
        let report = stats.report();
        assert_eq!(report.blocks, 1);
        assert_eq!(report.empty_blocks, 1);
        assert_eq!(report.components, 8);
        assert_eq!(report.skipped, 2);
        assert_eq!(
            report.to_string(),
            "blocks: 1 (1 empty) samples: 4 windows: 1 skipped: 2 tx: 0"
        );
    }
}

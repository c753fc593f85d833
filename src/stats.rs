//! Per-session traffic statistics
//!
//! Thread-safe counters updated from the caller thread, the transmit
//! worker and the adapter's receive thread. Uses lock-free atomics.

use crate::transmit::TxOutcome;
use std::sync::atomic::{AtomicU64, Ordering};

/// Traffic counters (fully lock-free)
#[derive(Default)]
pub struct Stats {
    /// Complete frames assembled from the bus
    rx_frames: AtomicU64,
    /// Frames handed to the receive callback
    rx_delivered: AtomicU64,
    /// Frames addressed elsewhere
    rx_filtered: AtomicU64,
    /// Malformed frames dropped by the assembler
    rx_malformed: AtomicU64,
    tx_acked: AtomicU64,
    tx_not_acked: AtomicU64,
    tx_failed: AtomicU64,
}

/// Point-in-time copy of [`Stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub rx_frames: u64,
    pub rx_delivered: u64,
    pub rx_filtered: u64,
    pub rx_malformed: u64,
    pub tx_acked: u64,
    pub tx_not_acked: u64,
    pub tx_failed: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_rx_frame(&self) {
        self.rx_frames.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_rx_delivered(&self) {
        self.rx_delivered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_rx_filtered(&self) {
        self.rx_filtered.fetch_add(1, Ordering::Relaxed);
    }

    /// Store the assembler's running malformed count
    #[inline]
    pub fn set_rx_malformed(&self, total: u64) {
        self.rx_malformed.store(total, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_tx(&self, outcome: TxOutcome) {
        let counter = match outcome {
            TxOutcome::Acknowledged => &self.tx_acked,
            TxOutcome::NotAcknowledged => &self.tx_not_acked,
            TxOutcome::Failed => &self.tx_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            rx_delivered: self.rx_delivered.load(Ordering::Relaxed),
            rx_filtered: self.rx_filtered.load(Ordering::Relaxed),
            rx_malformed: self.rx_malformed.load(Ordering::Relaxed),
            tx_acked: self.tx_acked.load(Ordering::Relaxed),
            tx_not_acked: self.tx_not_acked.load(Ordering::Relaxed),
            tx_failed: self.tx_failed.load(Ordering::Relaxed),
        }
    }
}

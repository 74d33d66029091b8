//! Rebalance traffic counters.

use crate::observability;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Node-wide rebalance counters, updated by the send/receive paths.
#[derive(Debug, Default)]
pub struct TargetStats {
    tx_reb_count: AtomicU64,
    tx_reb_bytes: AtomicU64,
    rx_reb_count: AtomicU64,
    rx_reb_bytes: AtomicU64,
}

impl TargetStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one transmitted object.
    pub fn add_tx(&self, bytes: u64) {
        self.tx_reb_count.fetch_add(1, Ordering::Relaxed);
        self.tx_reb_bytes.fetch_add(bytes, Ordering::Relaxed);
        observability::record_reb_tx(bytes);
    }

    /// Record one received object.
    pub fn add_rx(&self, bytes: u64) {
        self.rx_reb_count.fetch_add(1, Ordering::Relaxed);
        self.rx_reb_bytes.fetch_add(bytes, Ordering::Relaxed);
        observability::record_reb_rx(bytes);
    }

    /// Capture the current counter values.
    pub fn snapshot(&self) -> RebStatsSnapshot {
        RebStatsSnapshot {
            tx_count: self.tx_reb_count.load(Ordering::Relaxed),
            tx_bytes: self.tx_reb_bytes.load(Ordering::Relaxed),
            rx_count: self.rx_reb_count.load(Ordering::Relaxed),
            rx_bytes: self.rx_reb_bytes.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the rebalance counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebStatsSnapshot {
    pub tx_count: u64,
    pub tx_bytes: u64,
    pub rx_count: u64,
    pub rx_bytes: u64,
}

impl RebStatsSnapshot {
    /// Per-run delta relative to the snapshot taken at Init.
    pub fn delta_since(&self, begin: &RebStatsSnapshot) -> RebStatsSnapshot {
        RebStatsSnapshot {
            tx_count: self.tx_count.saturating_sub(begin.tx_count),
            tx_bytes: self.tx_bytes.saturating_sub(begin.tx_bytes),
            rx_count: self.rx_count.saturating_sub(begin.rx_count),
            rx_bytes: self.rx_bytes.saturating_sub(begin.rx_bytes),
        }
    }
}

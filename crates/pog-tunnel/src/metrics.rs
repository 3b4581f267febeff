//! Process-scoped tunnel counters

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counters shared by every session of one proxy process
#[derive(Debug, Default)]
pub struct TunnelMetrics {
    active: AtomicI64,
    total: AtomicU64,
    bytes_to_remote: AtomicU64,
    bytes_to_local: AtomicU64,
}

/// Point-in-time copy of [`TunnelMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub active: i64,
    pub total: u64,
    pub bytes_to_remote: u64,
    pub bytes_to_local: u64,
}

impl TunnelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a tunnel as active until the returned guard is dropped
    pub fn open(&self) -> ActiveTunnel<'_> {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        ActiveTunnel { metrics: self }
    }

    pub fn record_bytes(&self, to_remote: u64, to_local: u64) {
        self.bytes_to_remote.fetch_add(to_remote, Ordering::Relaxed);
        self.bytes_to_local.fetch_add(to_local, Ordering::Relaxed);
    }

    pub fn active(&self) -> i64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active: self.active.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
            bytes_to_remote: self.bytes_to_remote.load(Ordering::Relaxed),
            bytes_to_local: self.bytes_to_local.load(Ordering::Relaxed),
        }
    }
}

/// Keeps the active-tunnel gauge raised while alive
#[derive(Debug)]
pub struct ActiveTunnel<'a> {
    metrics: &'a TunnelMetrics,
}

impl Drop for ActiveTunnel<'_> {
    fn drop(&mut self) {
        self.metrics.active.fetch_sub(1, Ordering::Relaxed);
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatcherSnapshot {
    pub accepted: u64,
    pub active: u64,
    pub relayed: u64,
    pub rejected: u64,
    pub bytes_upstream: u64,
    pub bytes_downstream: u64,
}

/// Session counters for one dispatcher.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    accepted: AtomicU64,
    active: AtomicU64,
    relayed: AtomicU64,
    rejected: AtomicU64,
    bytes_upstream: AtomicU64,
    bytes_downstream: AtomicU64,
}

impl DispatcherStats {
    /// Counts an accepted session and returns its id.
    pub fn inc_accepted(&self) -> u64 {
        self.accepted.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relayed(&self, upstream: u64, downstream: u64) {
        self.relayed.fetch_add(1, Ordering::Relaxed);
        self.bytes_upstream.fetch_add(upstream, Ordering::Relaxed);
        self.bytes_downstream.fetch_add(downstream, Ordering::Relaxed);
    }

    /// Marks a session live until the returned guard drops.
    pub fn track_active(&self) -> ActiveGuard<'_> {
        self.active.fetch_add(1, Ordering::AcqRel);
        ActiveGuard { stats: self }
    }

    pub fn snapshot(&self) -> DispatcherSnapshot {
        DispatcherSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Acquire),
            relayed: self.relayed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            bytes_upstream: self.bytes_upstream.load(Ordering::Relaxed),
            bytes_downstream: self.bytes_downstream.load(Ordering::Relaxed),
        }
    }
}

pub struct ActiveGuard<'a> {
    stats: &'a DispatcherStats,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::AcqRel);
    }
}

pub fn format_stats(stats: DispatcherSnapshot) -> String {
    format!(
        "sessions_accepted={} sessions_active={} sessions_relayed={} sessions_rejected={} bytes_upstream={} bytes_downstream={}",
        stats.accepted,
        stats.active,
        stats.relayed,
        stats.rejected,
        stats.bytes_upstream,
        stats.bytes_downstream
    )
}

//! Server metrics for observability
//!
//! Provides runtime counters for monitoring viewer traffic and snapshot health.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently attached viewers across all sessions
    pub active_connections: AtomicU64,
    /// Total viewer connections since server start
    pub total_connections: AtomicU64,
    /// Connection attempts refused before upgrade (missing or unknown session)
    pub rejected_connections: AtomicU64,

    // Message metrics
    /// Frames written to viewer sockets
    pub frames_fanned_out: AtomicU64,
    /// Messages dropped by slow viewers' queues
    pub messages_dropped: AtomicU64,
    /// Input tokens forwarded to sessions
    pub inputs_relayed: AtomicU64,
    /// Input tokens refused as malformed
    pub inputs_rejected: AtomicU64,

    // Snapshot metrics
    pub snapshots_written: AtomicU64,
    pub snapshots_failed: AtomicU64,
    /// Ticks where the session had nothing to capture
    pub snapshots_skipped: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    // Message tracking
    pub fn frames_sent(&self, n: u64) {
        self.frames_fanned_out.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, n: u64) {
        self.messages_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn input_relayed(&self) {
        self.inputs_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn input_rejected(&self) {
        self.inputs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    // Snapshot tracking
    pub fn snapshot_written(&self) {
        self.snapshots_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_failed(&self) {
        self.snapshots_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_skipped(&self) {
        self.snapshots_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
                rejected: self.rejected_connections.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                frames_fanned_out: self.frames_fanned_out.load(Ordering::Relaxed),
                dropped: self.messages_dropped.load(Ordering::Relaxed),
                inputs_relayed: self.inputs_relayed.load(Ordering::Relaxed),
                inputs_rejected: self.inputs_rejected.load(Ordering::Relaxed),
            },
            snapshots: SnapshotMetrics {
                written: self.snapshots_written.load(Ordering::Relaxed),
                failed: self.snapshots_failed.load(Ordering::Relaxed),
                skipped: self.snapshots_skipped.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub snapshots: SnapshotMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub frames_fanned_out: u64,
    pub dropped: u64,
    pub inputs_relayed: u64,
    pub inputs_rejected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetrics {
    pub written: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub sessions: SessionHealth,
    pub viewers: u64,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHealth {
    pub total: u64,
    pub running: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_tracking() {
        let metrics = ServerMetrics::new();

        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_rejected();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.total_connections.load(Ordering::Relaxed), 2);

        metrics.connection_closed();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections.active, 1);
        assert_eq!(snapshot.connections.total, 2);
        assert_eq!(snapshot.connections.rejected, 1);
    }

    #[test]
    fn test_snapshot_counters() {
        let metrics = ServerMetrics::new();
        metrics.snapshot_written();
        metrics.snapshot_written();
        metrics.snapshot_failed();
        metrics.snapshot_skipped();
        metrics.frames_sent(3);
        metrics.record_dropped(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.snapshots.written, 2);
        assert_eq!(snapshot.snapshots.failed, 1);
        assert_eq!(snapshot.snapshots.skipped, 1);
        assert_eq!(snapshot.messages.frames_fanned_out, 3);
        assert_eq!(snapshot.messages.dropped, 2);
    }
}

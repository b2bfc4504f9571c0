//! Session metrics for observability
//!
//! Counters are updated by the supervisor, heartbeat and ingest tasks; the
//! gauges are what the "exactly one live connection" checks read.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide session metrics
#[derive(Debug, Default)]
pub struct SessionMetrics {
    // Gauges
    /// Persistent connections currently open
    pub active_links: AtomicU64,
    /// Heartbeat tasks currently running
    pub active_heartbeats: AtomicU64,
    /// Ingest loops currently running
    pub active_ingest: AtomicU64,

    // Counters
    /// Successful dial + handshake, initial or not
    pub links_opened: AtomicU64,
    /// Successful redials after a failure
    pub reconnects: AtomicU64,
    /// Messages pushed to the delivery queue
    pub messages_delivered: AtomicU64,
    /// Frames that were neither JSON nor the liveness acknowledgement
    pub malformed_frames: AtomicU64,
    /// `message` frames carrying an error field
    pub remote_errors: AtomicU64,
    pub heartbeat_failures: AtomicU64,
}

/// Which gauge a [`GaugeGuard`] holds up.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Gauge {
    Links,
    Heartbeats,
    Ingest,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn gauge(&self, gauge: Gauge) -> &AtomicU64 {
        match gauge {
            Gauge::Links => &self.active_links,
            Gauge::Heartbeats => &self.active_heartbeats,
            Gauge::Ingest => &self.active_ingest,
        }
    }

    pub fn link_opened(&self) {
        self.links_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnected(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remote_error(&self) {
        self.remote_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_failed(&self) {
        self.heartbeat_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active: ActiveMetrics {
                links: self.active_links.load(Ordering::Relaxed),
                heartbeats: self.active_heartbeats.load(Ordering::Relaxed),
                ingest: self.active_ingest.load(Ordering::Relaxed),
            },
            links_opened: self.links_opened.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
            heartbeat_failures: self.heartbeat_failures.load(Ordering::Relaxed),
        }
    }
}

/// Decrements its gauge on drop.
#[derive(Debug)]
pub(crate) struct GaugeGuard {
    metrics: Arc<SessionMetrics>,
    gauge: Gauge,
}

impl GaugeGuard {
    /// Increment `gauge` until the returned guard is dropped.
    pub(crate) fn enter(metrics: &Arc<SessionMetrics>, gauge: Gauge) -> Self {
        metrics.gauge(gauge).fetch_add(1, Ordering::Relaxed);
        Self {
            metrics: Arc::clone(metrics),
            gauge,
        }
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.metrics
            .gauge(self.gauge)
            .fetch_sub(1, Ordering::Relaxed);
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub active: ActiveMetrics,
    pub links_opened: u64,
    pub reconnects: u64,
    pub messages_delivered: u64,
    pub malformed_frames: u64,
    pub remote_errors: u64,
    pub heartbeat_failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveMetrics {
    pub links: u64,
    pub heartbeats: u64,
    pub ingest: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_guard() {
        let metrics = Arc::new(SessionMetrics::new());

        let a = GaugeGuard::enter(&metrics, Gauge::Links);
        let b = GaugeGuard::enter(&metrics, Gauge::Heartbeats);
        let c = GaugeGuard::enter(&metrics, Gauge::Heartbeats);
        assert_eq!(metrics.snapshot().active.links, 1);
        assert_eq!(metrics.snapshot().active.heartbeats, 2);

        drop(b);
        drop(a);
        let snap = metrics.snapshot();
        assert_eq!(snap.active.links, 0);
        assert_eq!(snap.active.heartbeats, 1);
        drop(c);
        assert_eq!(metrics.snapshot().active.heartbeats, 0);
    }

    #[test]
    fn test_counters() {
        let metrics = SessionMetrics::new();
        metrics.link_opened();
        metrics.link_opened();
        metrics.reconnected();
        metrics.message_delivered();
        metrics.malformed_frame();
        metrics.heartbeat_failed();

        let snap = metrics.snapshot();
        assert_eq!(snap.links_opened, 2);
        assert_eq!(snap.reconnects, 1);
        assert_eq!(snap.messages_delivered, 1);
        assert_eq!(snap.malformed_frames, 1);
        assert_eq!(snap.remote_errors, 0);
        assert_eq!(snap.heartbeat_failures, 1);
    }

    #[test]
    fn test_snapshot_serialization() {
        let metrics = SessionMetrics::new();
        metrics.reconnected();

        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("\"reconnects\":1"));
        assert!(json.contains("\"active\""));
    }
}

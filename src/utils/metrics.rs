//! Observability counters for the transport.
//!
//! Thread-safe atomic counters incremented on the hot paths, with a
//! consistent snapshot type for reporting.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

/// Counters shared by one server or client instance.
#[derive(Debug, Default)]
pub struct TransportMetrics {
    /// Sessions accepted over the lifetime of the instance
    pub connections_total: AtomicU64,
    /// Currently active sessions
    pub connections_active: AtomicU64,
    /// Connect attempts rejected (duplicate address)
    pub connections_rejected: AtomicU64,
    /// Sessions evicted by the idle sweep
    pub connections_timed_out: AtomicU64,
    /// Messages handed to the application layer
    pub messages_received: AtomicU64,
    /// Messages flushed into outbound batches
    pub messages_sent: AtomicU64,
    /// Payload bytes received
    pub bytes_received: AtomicU64,
    /// Payload bytes sent
    pub bytes_sent: AtomicU64,
    /// Poll cycles completed (client side)
    pub poll_ticks: AtomicU64,
    /// Poll cycles that failed (client side)
    pub poll_failures: AtomicU64,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnection(&self) {
        // Saturating: stop() may race a sweep eviction for the same peer.
        let _ = self.connections_active.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |active| active.checked_sub(1),
        );
    }

    pub fn record_rejection(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.connections_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, messages: u64, bytes: u64) {
        self.messages_received.fetch_add(messages, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_sent(&self, messages: u64, bytes: u64) {
        self.messages_sent.fetch_add(messages, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_poll_tick(&self) {
        self.poll_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_failure(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            connections_timed_out: self.connections_timed_out.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            poll_ticks: self.poll_ticks.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
        }
    }

    /// Emit a one-line summary to the log.
    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            messages_received = snapshot.messages_received,
            messages_sent = snapshot.messages_sent,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            "Transport metrics"
        );
    }
}

/// Point-in-time copy of [`TransportMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub connections_timed_out: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub poll_ticks: u64,
    pub poll_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = TransportMetrics::new();
        metrics.record_connection();
        metrics.record_connection();
        metrics.record_disconnection();
        metrics.record_received(3, 120);
        metrics.record_sent(1, 40);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_total, 2);
        assert_eq!(snapshot.connections_active, 1);
        assert_eq!(snapshot.messages_received, 3);
        assert_eq!(snapshot.bytes_sent, 40);
    }

    #[test]
    fn active_count_never_underflows() {
        let metrics = TransportMetrics::new();
        metrics.record_disconnection();
        assert_eq!(metrics.snapshot().connections_active, 0);
    }
}

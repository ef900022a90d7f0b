//! Optional statistics sink.
//!
//! The node reports traffic and lookup events to a [`StatsSink`] if one is
//! installed. Every method has a no-op default, and a node without a sink
//! behaves exactly like one with.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub trait StatsSink: Send + Sync {
    fn bytes_sent(&self, _bytes: usize) {}

    fn bytes_received(&self, _bytes: usize) {}

    /// A node lookup finished after contacting `route_length` peers.
    fn lookup_finished(&self, _latency: Duration, _route_length: usize) {}

    fn content_lookup_finished(&self, _latency: Duration, _route_length: usize, _found: bool) {}

    fn bootstrap_finished(&self, _latency: Duration) {}
}

/// Counters accumulated by [`NodeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub lookups: u64,
    pub lookup_time_ms: u64,
    pub lookup_route_length: u64,
    pub content_lookups: u64,
    pub content_lookups_failed: u64,
    pub content_lookup_time_ms: u64,
    pub bootstrap_time_ms: u64,
}

impl StatsSnapshot {
    pub fn average_route_length(&self) -> f64 {
        if self.lookups == 0 {
            return 0.0;
        }
        self.lookup_route_length as f64 / self.lookups as f64
    }
}

/// Lock-free [`StatsSink`] backed by atomic counters.
#[derive(Debug, Default)]
pub struct NodeStats {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    datagrams_sent: AtomicU64,
    datagrams_received: AtomicU64,
    lookups: AtomicU64,
    lookup_time_ms: AtomicU64,
    lookup_route_length: AtomicU64,
    content_lookups: AtomicU64,
    content_lookups_failed: AtomicU64,
    content_lookup_time_ms: AtomicU64,
    bootstrap_time_ms: AtomicU64,
}

impl NodeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            lookup_time_ms: self.lookup_time_ms.load(Ordering::Relaxed),
            lookup_route_length: self.lookup_route_length.load(Ordering::Relaxed),
            content_lookups: self.content_lookups.load(Ordering::Relaxed),
            content_lookups_failed: self.content_lookups_failed.load(Ordering::Relaxed),
            content_lookup_time_ms: self.content_lookup_time_ms.load(Ordering::Relaxed),
            bootstrap_time_ms: self.bootstrap_time_ms.load(Ordering::Relaxed),
        }
    }
}

impl StatsSink for NodeStats {
    fn bytes_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn bytes_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    fn lookup_finished(&self, latency: Duration, route_length: usize) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.lookup_time_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        self.lookup_route_length
            .fetch_add(route_length as u64, Ordering::Relaxed);
    }

    fn content_lookup_finished(&self, latency: Duration, _route_length: usize, found: bool) {
        self.content_lookups.fetch_add(1, Ordering::Relaxed);
        self.content_lookup_time_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        if !found {
            self.content_lookups_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn bootstrap_finished(&self, latency: Duration) {
        self.bootstrap_time_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }
}

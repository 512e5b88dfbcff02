//! Observability and Metrics
//!
//! Counters for relay throughput and decoder health.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for relay operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections created
    pub connections_total: AtomicU64,
    /// Currently live connections
    pub connections_active: AtomicU64,
    /// Datagrams received from clients
    pub datagrams_from_clients: AtomicU64,
    /// Datagrams received from the upstream server
    pub datagrams_from_server: AtomicU64,
    /// Bytes received from clients
    pub bytes_from_clients: AtomicU64,
    /// Bytes received from the upstream server
    pub bytes_from_server: AtomicU64,
    /// Decode failures reported at the datagram boundary
    pub decode_errors: AtomicU64,
    /// ACK batches observed
    pub ack_batches: AtomicU64,
    /// NAK batches observed
    pub nak_batches: AtomicU64,
    /// Encapsulated frames decoded
    pub frames_decoded: AtomicU64,
    /// Split payloads reassembled
    pub compounds_reassembled: AtomicU64,
    /// Incomplete split payloads dropped
    pub compounds_evicted: AtomicU64,
    /// Application batches inflated
    pub batches_inflated: AtomicU64,
    /// Connections demoted to passthrough
    pub passthrough_demotions: AtomicU64,
    /// Login packets observed
    pub logins: AtomicU64,
    /// Datagrams dropped because the source is banned
    pub banned_drops: AtomicU64,
    /// Datagrams that could not be forwarded
    pub forward_errors: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            datagrams_from_clients: AtomicU64::new(0),
            datagrams_from_server: AtomicU64::new(0),
            bytes_from_clients: AtomicU64::new(0),
            bytes_from_server: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            ack_batches: AtomicU64::new(0),
            nak_batches: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            compounds_reassembled: AtomicU64::new(0),
            compounds_evicted: AtomicU64::new(0),
            batches_inflated: AtomicU64::new(0),
            passthrough_demotions: AtomicU64::new(0),
            logins: AtomicU64::new(0),
            banned_drops: AtomicU64::new(0),
            forward_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a datagram from a client
    pub fn client_datagram(&self, byte_count: u64) {
        self.datagrams_from_clients.fetch_add(1, Ordering::Relaxed);
        self.bytes_from_clients.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a datagram from the upstream server
    pub fn server_datagram(&self, byte_count: u64) {
        self.datagrams_from_server.fetch_add(1, Ordering::Relaxed);
        self.bytes_from_server.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_batch(&self) {
        self.ack_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn nak_batch(&self) {
        self.nak_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn compound_reassembled(&self) {
        self.compounds_reassembled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn compound_evicted(&self) {
        self.compounds_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_inflated(&self) {
        self.batches_inflated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn passthrough_demotion(&self) {
        self.passthrough_demotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn login(&self) {
        self.logins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn banned_drop(&self) {
        self.banned_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn forward_error(&self) {
        self.forward_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            datagrams_from_clients: self.datagrams_from_clients.load(Ordering::Relaxed),
            datagrams_from_server: self.datagrams_from_server.load(Ordering::Relaxed),
            bytes_from_clients: self.bytes_from_clients.load(Ordering::Relaxed),
            bytes_from_server: self.bytes_from_server.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            ack_batches: self.ack_batches.load(Ordering::Relaxed),
            nak_batches: self.nak_batches.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            compounds_reassembled: self.compounds_reassembled.load(Ordering::Relaxed),
            compounds_evicted: self.compounds_evicted.load(Ordering::Relaxed),
            batches_inflated: self.batches_inflated.load(Ordering::Relaxed),
            passthrough_demotions: self.passthrough_demotions.load(Ordering::Relaxed),
            logins: self.logins.load(Ordering::Relaxed),
            banned_drops: self.banned_drops.load(Ordering::Relaxed),
            forward_errors: self.forward_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            datagrams_from_clients = snapshot.datagrams_from_clients,
            datagrams_from_server = snapshot.datagrams_from_server,
            bytes_from_clients = snapshot.bytes_from_clients,
            bytes_from_server = snapshot.bytes_from_server,
            decode_errors = snapshot.decode_errors,
            ack_batches = snapshot.ack_batches,
            nak_batches = snapshot.nak_batches,
            frames_decoded = snapshot.frames_decoded,
            compounds_reassembled = snapshot.compounds_reassembled,
            compounds_evicted = snapshot.compounds_evicted,
            batches_inflated = snapshot.batches_inflated,
            passthrough_demotions = snapshot.passthrough_demotions,
            logins = snapshot.logins,
            banned_drops = snapshot.banned_drops,
            forward_errors = snapshot.forward_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Relay metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub datagrams_from_clients: u64,
    pub datagrams_from_server: u64,
    pub bytes_from_clients: u64,
    pub bytes_from_server: u64,
    pub decode_errors: u64,
    pub ack_batches: u64,
    pub nak_batches: u64,
    pub frames_decoded: u64,
    pub compounds_reassembled: u64,
    pub compounds_evicted: u64,
    pub batches_inflated: u64,
    pub passthrough_demotions: u64,
    pub logins: u64,
    pub banned_drops: u64,
    pub forward_errors: u64,
    pub uptime_seconds: u64,
}

/// Global metrics instance (lazy static for simplicity)
static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}

//! Counter metrics for the relay.
//!
//! Components never talk to a metrics backend directly. They receive an
//! `Arc<dyn MetricSink>` at construction and bump named counters on it:
//!
//! - [`CounterRegistry`]: in-memory counters, read back by tests and the CLI.
//! - [`PrometheusSink`]: exposes every counter under one labelled family.
//! - [`FanoutSink`]: forwards each update to several sinks.
//! - [`MetricBatcher`]: accumulates deltas and flushes them periodically.
//!
//! Counter names are namespaced by listener name or protocol label, e.g.
//! `ingest.receivedMessageCount` or `tls.sentByteCount`.

pub mod batcher;
pub mod prometheus;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

pub use batcher::MetricBatcher;
pub use prometheus::PrometheusSink;

/// Process-wide count of envelopes received by any listener.
pub const TOTAL_RECEIVED_MESSAGE_COUNT: &str = "listeners.totalReceivedMessageCount";

/// Per-listener counter suffixes.
pub const RECEIVED_MESSAGE_COUNT: &str = "receivedMessageCount";
pub const RECEIVED_BYTE_COUNT: &str = "receivedByteCount";
pub const RECEIVE_ERROR_COUNT: &str = "receiveErrorCount";

/// Per-protocol forwarder counter suffixes.
pub const SENT_MESSAGE_COUNT: &str = "sentMessageCount";
pub const SENT_BYTE_COUNT: &str = "sentByteCount";
pub const SEND_ERROR_COUNT: &str = "sendErrorCount";

/// Build a namespaced counter name, e.g. `ingest.receiveErrorCount`.
#[must_use]
pub fn listener_counter(namespace: &str, suffix: &str) -> String {
    format!("{namespace}.{suffix}")
}

/// Destination for counter updates.
///
/// Implementations must be safe to call concurrently from every connection
/// task.
pub trait MetricSink: Send + Sync {
    /// Add one to `name`.
    fn increment_counter(&self, name: &str) {
        self.add_counter(name, 1);
    }

    /// Add `amount` to `name`.
    fn add_counter(&self, name: &str, amount: u64);
}

/// In-memory counters keyed by name.
#[derive(Debug, Default)]
pub struct CounterRegistry {
    counters: DashMap<String, AtomicU64>,
}

impl CounterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `name`, zero if it was never touched.
    #[must_use]
    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Copy of every counter, sorted by name.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }

    /// Drop every counter.
    pub fn reset(&self) {
        self.counters.clear();
    }

    /// Set `name` to zero and return what it held.
    pub(crate) fn take(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map_or(0, |c| c.swap(0, Ordering::Relaxed))
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.counters.iter().map(|e| e.key().clone()).collect()
    }
}

impl MetricSink for CounterRegistry {
    fn add_counter(&self, name: &str, amount: u64) {
        if let Some(counter) = self.counters.get(name) {
            counter.fetch_add(amount, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry(name.to_string())
            .or_default()
            .fetch_add(amount, Ordering::Relaxed);
    }
}

/// Sends every update to each wrapped sink in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn MetricSink>>,
}

impl FanoutSink {
    /// Create a fanout over `sinks`.
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn MetricSink>>) -> Self {
        Self { sinks }
    }

    /// Add another sink.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl MetricSink for FanoutSink {
    fn add_counter(&self, name: &str, amount: u64) {
        for sink in &self.sinks {
            sink.add_counter(name, amount);
        }
    }
}

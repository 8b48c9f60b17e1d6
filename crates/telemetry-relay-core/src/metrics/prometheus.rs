//! Prometheus exposition for relay counters.
//!
//! Every counter name becomes a label value on a single family,
//! `telemetry_relay_counter_total{name="..."}`, so new listeners and
//! protocols need no registration.

use prometheus::{IntCounterVec, Opts, Registry, TextEncoder};

use super::MetricSink;

/// Metric family every relay counter is exported under.
pub const COUNTER_FAMILY: &str = "telemetry_relay_counter_total";

/// Counter sink backed by a Prometheus registry.
pub struct PrometheusSink {
    /// The Prometheus registry.
    pub registry: Registry,

    counters: IntCounterVec,
}

impl PrometheusSink {
    /// Create a sink with its own registry.
    ///
    /// # Panics
    ///
    /// Panics if metric registration fails (should not happen with unique names).
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let counters = IntCounterVec::new(
            Opts::new(COUNTER_FAMILY, "Relay counters by name"),
            &["name"],
        )
        .expect("metric creation should succeed");

        registry
            .register(Box::new(counters.clone()))
            .expect("metric registration should succeed");

        Self { registry, counters }
    }

    /// Encode metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = String::new();
        encoder.encode_utf8(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSink for PrometheusSink {
    fn add_counter(&self, name: &str, amount: u64) {
        self.counters.with_label_values(&[name]).inc_by(amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sink_encodes() {
        let sink = PrometheusSink::new();
        assert!(sink.encode().is_ok());
    }

    #[test]
    fn test_counters_exported_by_name() {
        let sink = PrometheusSink::new();
        sink.increment_counter("ingest.receivedMessageCount");
        sink.increment_counter("ingest.receivedMessageCount");
        sink.add_counter("ingest.receivedByteCount", 512);

        let output = sink.encode().unwrap();
        assert!(output.contains(
            r#"telemetry_relay_counter_total{name="ingest.receivedMessageCount"} 2"#
        ));
        assert!(output.contains(
            r#"telemetry_relay_counter_total{name="ingest.receivedByteCount"} 512"#
        ));
    }
}

//! Batched counter emission.
//!
//! Hot paths bump counters on the batcher, which only touches local atomics.
//! Accumulated deltas reach the downstream sink on [`MetricBatcher::flush`],
//! either explicitly or from the task started by [`MetricBatcher::spawn`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{CounterRegistry, MetricSink};

/// Accumulates counter deltas and forwards them in batches.
pub struct MetricBatcher {
    pending: CounterRegistry,
    downstream: Arc<dyn MetricSink>,
}

impl MetricBatcher {
    /// Create a batcher that flushes into `downstream`.
    #[must_use]
    pub fn new(downstream: Arc<dyn MetricSink>) -> Self {
        Self {
            pending: CounterRegistry::new(),
            downstream,
        }
    }

    /// Forward every non-zero pending delta and reset it.
    pub fn flush(&self) {
        let mut flushed = 0usize;
        for name in self.pending.names() {
            let delta = self.pending.take(&name);
            if delta > 0 {
                self.downstream.add_counter(&name, delta);
                flushed += 1;
            }
        }
        if flushed > 0 {
            trace!(counters = flushed, "flushed metric batch");
        }
    }

    /// Flush every `interval` until `shutdown` fires, then flush once more.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => self.flush(),
                }
            }

            self.flush();
            debug!("metric batcher stopped");
        })
    }
}

impl MetricSink for MetricBatcher {
    fn add_counter(&self, name: &str, amount: u64) {
        self.pending.add_counter(name, amount);
    }
}

//! Test harness for listener integration tests.
//!
//! Provides a started [`IngestListener`] on an ephemeral port together with
//! its output channel and an in-memory counter registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::metrics::CounterRegistry;
use crate::network::{IngestListener, ListenerOptions};
use crate::tls::TlsMaterial;

/// How long helpers wait for envelopes or counters before giving up.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A running listener wired to a channel and a counter registry.
pub struct ListenerHarness {
    /// The listener under test.
    pub listener: IngestListener,
    /// Counters the listener reports into.
    pub metrics: Arc<CounterRegistry>,
    receiver: mpsc::Receiver<Envelope>,
}

impl ListenerHarness {
    /// Start a plain TCP listener named `name`.
    pub async fn plain(name: &str) -> Self {
        Self::start(name, None, ListenerOptions::default(), 64).await
    }

    /// Start a mutual-TLS listener named `name`.
    pub async fn tls(name: &str, material: &TlsMaterial) -> Self {
        Self::start(name, Some(material), ListenerOptions::default(), 64).await
    }

    /// Start a listener with explicit options and output channel capacity.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be created or started (test-only).
    pub async fn start(
        name: &str,
        tls: Option<&TlsMaterial>,
        options: ListenerOptions,
        capacity: usize,
    ) -> Self {
        let metrics = Arc::new(CounterRegistry::new());
        let (tx, receiver) = mpsc::channel(capacity);
        let listener =
            IngestListener::with_options(name, "127.0.0.1:0", tls, tx, metrics.clone(), options)
                .expect("listener creation should succeed");
        listener
            .start()
            .await
            .expect("listener start should succeed");

        Self {
            listener,
            metrics,
            receiver,
        }
    }

    /// Address senders should connect to.
    #[must_use]
    pub fn address(&self) -> String {
        self.listener.address().to_string()
    }

    /// Current value of a counter.
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.metrics.get(name)
    }

    /// Wait for the next envelope, `None` on timeout or closed channel.
    pub async fn recv(&mut self) -> Option<Envelope> {
        tokio::time::timeout(WAIT_TIMEOUT, self.receiver.recv())
            .await
            .ok()
            .flatten()
    }

    /// Take an envelope only if one is already queued.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }

    /// Poll until `name` reaches `expected` or the wait times out; returns the
    /// last observed value.
    pub async fn wait_for_counter(&self, name: &str, expected: u64) -> u64 {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            let value = self.metrics.get(name);
            if value >= expected || tokio::time::Instant::now() >= deadline {
                return value;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Poll until no connection is being served.
    pub async fn wait_for_idle(&self) {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        while self.listener.active_connections() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Stop the listener.
    pub async fn stop(&self) {
        self.listener.stop().await;
    }
}

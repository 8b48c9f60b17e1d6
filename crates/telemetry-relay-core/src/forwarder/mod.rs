//! Egress forwarder.
//!
//! Writes one already-serialized envelope per call through a [`FrameWriter`]
//! and keeps per-protocol counters:
//!
//! - success: `<label>.sentMessageCount` +1, `<label>.sentByteCount` += bytes
//!   the writer reports
//! - failure: `<label>.sendErrorCount` +1, the writer is closed and the
//!   original error returned
//!
//! There is no retry and no buffering. Reconnecting after a failure is the
//! caller's job.
//!
//! # Example
//!
//! ```ignore
//! let connector = TlsConnector::new(&material)?;
//! let mut client =
//!     TransportClient::connect("relay:3458", Some(&connector), Some("relay"), timeout).await?;
//! let forwarder = Forwarder::new(client.protocol(), metrics);
//! forwarder.forward(&mut client, &envelope).await?;
//! ```

mod client;

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use prost::Message;
use tracing::{debug, trace, warn};

use crate::envelope::Envelope;
use crate::error::ForwarderError;
use crate::metrics::{
    listener_counter, MetricSink, SEND_ERROR_COUNT, SENT_BYTE_COUNT, SENT_MESSAGE_COUNT,
};

pub use client::TransportClient;

/// A connection that can carry one serialized envelope at a time.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write `message` as one frame.
    ///
    /// Returns the number of payload bytes the transport accepted, which is
    /// what gets counted and may differ from `message.len()`.
    async fn write(&mut self, message: &[u8]) -> io::Result<usize>;

    /// Close the connection.
    async fn close(&mut self) -> io::Result<()>;
}

/// Writes envelopes through a [`FrameWriter`] and counts the outcome.
pub struct Forwarder {
    label: String,
    metrics: Arc<dyn MetricSink>,
    sent_message_count: String,
    sent_byte_count: String,
    send_error_count: String,
}

impl Forwarder {
    /// Create a forwarder whose counters are namespaced by `label`,
    /// typically `"tcp"` or `"tls"`.
    pub fn new(label: impl Into<String>, metrics: Arc<dyn MetricSink>) -> Self {
        let label = label.into();
        Self {
            sent_message_count: listener_counter(&label, SENT_MESSAGE_COUNT),
            sent_byte_count: listener_counter(&label, SENT_BYTE_COUNT),
            send_error_count: listener_counter(&label, SEND_ERROR_COUNT),
            label,
            metrics,
        }
    }

    /// Protocol label used as the metric namespace.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Write one serialized envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ForwarderError::Write`] with the client's error. The client
    /// has been closed by the time this returns.
    pub async fn write<W>(&self, client: &mut W, message: &[u8]) -> Result<(), ForwarderError>
    where
        W: FrameWriter + ?Sized,
    {
        match client.write(message).await {
            Ok(sent) => {
                self.metrics.increment_counter(&self.sent_message_count);
                self.metrics.add_counter(&self.sent_byte_count, sent as u64);
                trace!(protocol = %self.label, bytes = sent, "forwarded envelope");
                Ok(())
            }
            Err(e) => {
                self.metrics.increment_counter(&self.send_error_count);
                warn!(protocol = %self.label, error = %e, "failed to forward envelope");
                if let Err(close_err) = client.close().await {
                    debug!(
                        protocol = %self.label,
                        error = %close_err,
                        "error closing client after failed write"
                    );
                }
                Err(ForwarderError::Write(e))
            }
        }
    }

    /// Serialize `envelope` and [`write`](Self::write) it.
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write).
    pub async fn forward<W>(
        &self,
        client: &mut W,
        envelope: &Envelope,
    ) -> Result<(), ForwarderError>
    where
        W: FrameWriter + ?Sized,
    {
        self.write(client, &envelope.encode_to_vec()).await
    }
}

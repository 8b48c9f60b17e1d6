//! Per-connection frame reader.
//!
//! Runs the optional TLS handshake, then decodes frames until the sender
//! disconnects, a frame is malformed, or the listener shuts down. A failed
//! connection bumps `<listener>.receiveErrorCount` exactly once.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tracing::{debug, instrument, trace, warn};

use crate::error::{FramingError, TlsError};
use crate::metrics::TOTAL_RECEIVED_MESSAGE_COUNT;

use super::client_stream::PeerStream;
use super::codec::EnvelopeCodec;
use super::listener::ListenerShared;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
enum ConnectionError {
    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// How a connection ended.
enum Outcome {
    /// Sender closed on a frame boundary, or the output channel went away.
    Closed,
    /// The listener is stopping.
    Shutdown,
}

/// Serves one accepted sender connection.
pub(crate) struct ConnectionHandler {
    shared: Arc<ListenerShared>,
    peer: SocketAddr,
    connection_id: u64,
}

impl ConnectionHandler {
    pub(crate) fn new(shared: Arc<ListenerShared>, peer: SocketAddr) -> Self {
        Self {
            shared,
            peer,
            connection_id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Serve the connection to completion, recording any failure.
    #[instrument(skip(self, socket), fields(
        listener = %self.shared.name,
        peer = %self.peer,
        connection_id = self.connection_id,
    ))]
    pub(crate) async fn run(self, socket: TcpStream) {
        let shutdown = self.shared.shutdown.clone();
        let result = tokio::select! {
            biased;
            () = shutdown.cancelled() => Ok(Outcome::Shutdown),
            result = self.serve(socket) => result,
        };

        match result {
            Ok(Outcome::Closed) => debug!("sender disconnected"),
            Ok(Outcome::Shutdown) => debug!("connection closed: shutdown"),
            Err(e) if self.shared.shutdown.is_cancelled() => {
                debug!(error = %e, "connection failed during shutdown");
            }
            Err(e) => {
                self.shared
                    .metrics
                    .increment_counter(&self.shared.receive_error_count);
                warn!(error = %e, "closing connection after receive error");
            }
        }

        self.shared
            .active_connections
            .fetch_sub(1, Ordering::Relaxed);
    }

    async fn serve(&self, socket: TcpStream) -> Result<Outcome, ConnectionError> {
        let stream = self.establish(socket).await?;
        let tls = stream.is_tls();
        if let Some(certs) = stream.peer_certificates() {
            debug!(chain_len = certs.len(), "sender authenticated");
        }

        let codec = EnvelopeCodec::with_max_frame_size(self.shared.options.max_frame_size);
        let mut frames = FramedRead::new(stream, codec);

        loop {
            let next = match self.shared.options.read_timeout {
                Some(limit) => timeout(limit, frames.next())
                    .await
                    .map_err(|_| FramingError::Timeout)?,
                None => frames.next().await,
            };
            let Some(frame) = next else {
                return Ok(Outcome::Closed);
            };
            let frame = match frame {
                Ok(frame) => frame,
                // A reset with nothing buffered lost no data.
                Err(e @ FramingError::Io(_))
                    if e.is_disconnect() && frames.read_buffer().is_empty() =>
                {
                    debug!(tls, error = %e, "sender dropped connection on frame boundary");
                    return Ok(Outcome::Closed);
                }
                Err(e) => return Err(e.into()),
            };

            trace!(
                event_type = frame.envelope.event_type,
                bytes = frame.payload_len,
                "received envelope"
            );

            if self.shared.output.send(frame.envelope).await.is_err() {
                debug!("output channel closed, dropping connection");
                return Ok(Outcome::Closed);
            }

            let metrics = &self.shared.metrics;
            metrics.increment_counter(&self.shared.received_message_count);
            metrics.increment_counter(TOTAL_RECEIVED_MESSAGE_COUNT);
            metrics.add_counter(&self.shared.received_byte_count, frame.payload_len as u64);
        }
    }

    async fn establish(&self, socket: TcpStream) -> Result<PeerStream, TlsError> {
        let Some(acceptor) = &self.shared.acceptor else {
            return Ok(PeerStream::from(socket));
        };

        let stream = match self.shared.options.handshake_timeout {
            Some(limit) => timeout(limit, acceptor.accept(socket))
                .await
                .map_err(|_| TlsError::HandshakeTimeout)??,
            None => acceptor.accept(socket).await?,
        };
        Ok(PeerStream::from(stream))
    }
}

//! TCP and TLS frame writers for a remote listener.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::ForwarderError;
use crate::network::codec::frame_payload;
use crate::tls::TlsConnector;

use super::FrameWriter;

type Upstream = Box<dyn AsyncWrite + Send + Unpin>;

/// Connection to a remote listener that writes length-prefixed frames.
pub struct TransportClient {
    stream: Option<Upstream>,
    address: SocketAddr,
    protocol: &'static str,
    write_timeout: Option<Duration>,
}

impl TransportClient {
    /// Connect to `address`, upgrading to TLS when a connector is given.
    ///
    /// `server_name` is only used for TLS; see [`TlsConnector::connect`].
    ///
    /// # Errors
    ///
    /// Returns an error if the address does not resolve, the connection is
    /// refused or times out, or the TLS handshake fails.
    pub async fn connect(
        address: &str,
        tls: Option<&TlsConnector>,
        server_name: Option<&str>,
        connect_timeout: Duration,
    ) -> Result<Self, ForwarderError> {
        let resolved = tokio::net::lookup_host(address)
            .await
            .map_err(|_| ForwarderError::Resolve(address.to_string()))?
            .next()
            .ok_or_else(|| ForwarderError::Resolve(address.to_string()))?;

        let socket = timeout(connect_timeout, TcpStream::connect(resolved))
            .await
            .map_err(|_| ForwarderError::ConnectTimeout(address.to_string()))?
            .map_err(|e| ForwarderError::connect(resolved, e))?;
        socket
            .set_nodelay(true)
            .map_err(|e| ForwarderError::connect(resolved, e))?;

        let (stream, protocol) = match tls {
            Some(connector) => {
                let stream = timeout(connect_timeout, connector.connect(socket, server_name))
                    .await
                    .map_err(|_| ForwarderError::ConnectTimeout(address.to_string()))??;
                (Box::new(stream) as Upstream, "tls")
            }
            None => (Box::new(socket) as Upstream, "tcp"),
        };

        info!(address = %resolved, protocol, "connected to upstream");
        Ok(Self {
            stream: Some(stream),
            address: resolved,
            protocol,
            write_timeout: None,
        })
    }

    /// Bound each frame write by `limit`.
    #[must_use]
    pub fn with_write_timeout(mut self, limit: Option<Duration>) -> Self {
        self.write_timeout = limit;
        self
    }

    /// `"tls"` or `"tcp"`, suitable as a forwarder label.
    #[must_use]
    pub fn protocol(&self) -> &'static str {
        self.protocol
    }

    /// Resolved upstream address.
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Whether [`close`](FrameWriter::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

async fn write_frame(stream: &mut Upstream, frame: &[u8]) -> io::Result<()> {
    stream.write_all(frame).await?;
    stream.flush().await
}

#[async_trait]
impl FrameWriter for TransportClient {
    async fn write(&mut self, message: &[u8]) -> io::Result<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "client is closed"))?;

        let frame = frame_payload(message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        match self.write_timeout {
            Some(limit) => timeout(limit, write_frame(stream, &frame))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "frame write timed out"))??,
            None => write_frame(stream, &frame).await?,
        }
        Ok(message.len())
    }

    async fn close(&mut self) -> io::Result<()> {
        match self.stream.take() {
            Some(mut stream) => {
                debug!(
                    address = %self.address,
                    protocol = self.protocol,
                    "closing upstream connection"
                );
                stream.shutdown().await
            }
            None => Ok(()),
        }
    }
}

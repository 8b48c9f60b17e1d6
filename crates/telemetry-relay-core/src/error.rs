//! Domain error types for the telemetry relay.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.
//! The split follows how failures are handled:
//!
//! - [`ConfigError`] / [`TlsError`] surface synchronously from constructors and
//!   are fatal to startup.
//! - [`ListenerError::InvalidStateTransition`] is a caller bug and must be
//!   treated as fatal.
//! - [`FramingError`] and [`ForwarderError`] are local to one connection.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::network::listener::ListenerState;

/// Errors related to configuration parsing and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Invalid address format.
    #[error("invalid address format: {0} (expected 'host:port')")]
    InvalidAddress(String),

    /// No listeners were configured.
    #[error("at least one listener must be configured")]
    NoListeners,

    /// Listener names are used as metric namespaces and must be unique.
    #[error("duplicate listener name: {0}")]
    DuplicateListener(String),

    /// Listener name is empty.
    #[error("listener name must not be empty")]
    EmptyListenerName,

    /// Frame size limit of zero would reject every frame.
    #[error("max_frame_size for listener '{0}' must be greater than zero")]
    InvalidFrameSize(String),

    /// Forwarding over TLS without certificate material.
    #[error("forward protocol 'tls' requires a tls section")]
    MissingForwardTls,

    /// The shared output channel needs room for at least one envelope.
    #[error("channel_capacity must be greater than zero")]
    ZeroChannelCapacity,
}

/// Errors produced while reading or writing a single frame.
///
/// Any of these leaves the byte stream at an unknown position, so the
/// connection that produced it must be closed.
#[derive(Error, Debug)]
pub enum FramingError {
    /// The stream ended before the declared frame was complete.
    #[error("truncated frame: expected {expected} bytes, stream ended after {received}")]
    Truncated { expected: usize, received: usize },

    /// Declared length exceeds the configured cap.
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Payload was not a valid envelope.
    #[error("invalid envelope payload: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Envelope could not be serialized into the frame buffer.
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] prost::EncodeError),

    /// Underlying read failed.
    #[error("frame read failed: {0}")]
    Io(#[from] io::Error),

    /// No complete frame arrived within the read timeout.
    #[error("timed out waiting for frame")]
    Timeout,
}

impl FramingError {
    /// Whether the failure came from the peer closing or resetting the socket.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Truncated { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Errors related to TLS configuration and handshakes.
#[derive(Error, Debug)]
pub enum TlsError {
    /// Certificate file could not be read.
    #[error("failed to load certificate from '{path}': {message}")]
    CertificateLoad { path: String, message: String },

    /// Private key file could not be read.
    #[error("failed to load private key from '{path}': {message}")]
    PrivateKeyLoad { path: String, message: String },

    /// File contained no PEM certificates.
    #[error("no certificates found in '{0}'")]
    NoCertificates(String),

    /// File contained no PEM private key.
    #[error("no private key found in '{0}'")]
    NoPrivateKeys(String),

    /// rustls rejected the configuration.
    #[error("invalid TLS configuration: {0}")]
    Config(String),

    /// The handshake with the peer failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    /// The handshake did not finish in time.
    #[error("TLS handshake timed out")]
    HandshakeTimeout,
}

impl TlsError {
    /// The certificate validation failure behind a handshake error, if any.
    ///
    /// Lets callers tell an untrusted authority apart from a name mismatch.
    #[must_use]
    pub fn certificate_error(&self) -> Option<&rustls::CertificateError> {
        let Self::Handshake(io_err) = self else {
            return None;
        };
        match io_err.get_ref()?.downcast_ref::<rustls::Error>()? {
            rustls::Error::InvalidCertificate(cert_err) => Some(cert_err),
            _ => None,
        }
    }
}

/// Errors raised by the ingestion listener.
#[derive(Error, Debug)]
pub enum ListenerError {
    /// Bind address could not be parsed or resolved.
    #[error("invalid bind address '{0}'")]
    InvalidAddress(String),

    /// Binding the socket failed.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// TLS material could not be loaded.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// `start` called twice, or after `stop`. Callers must treat this as fatal.
    #[error("listener '{name}': cannot {attempted} from state {from:?}")]
    InvalidStateTransition {
        name: String,
        from: ListenerState,
        attempted: &'static str,
    },

    /// Socket-level failure outside a connection.
    #[error("listener I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised by the egress forwarder and its clients.
#[derive(Error, Debug)]
pub enum ForwarderError {
    /// The underlying client failed to write the frame.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    /// Connecting to the upstream failed.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Connecting did not finish in time.
    #[error("connection to {0} timed out")]
    ConnectTimeout(String),

    /// Upstream address could not be resolved.
    #[error("no usable address for '{0}'")]
    Resolve(String),

    /// TLS setup or handshake with the upstream failed.
    #[error(transparent)]
    Tls(#[from] TlsError),
}

impl ForwarderError {
    /// Peer address helper for connect errors.
    pub(crate) fn connect(address: SocketAddr, source: io::Error) -> Self {
        Self::Connect {
            address: address.to_string(),
            source,
        }
    }
}

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for TLS operations.
pub type TlsResult<T> = std::result::Result<T, TlsError>;

/// Result type alias for listener operations.
pub type Result<T> = std::result::Result<T, ListenerError>;

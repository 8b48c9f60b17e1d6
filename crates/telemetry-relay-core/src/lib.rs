//! Telemetry Relay Core Library
//!
//! This library moves telemetry envelopes between processes over TCP or
//! mutual TLS. Every envelope travels as one length-prefixed protobuf frame.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`envelope`] - Envelope protobuf message and event payloads
//! - [`network`] - Frame codec and the ingestion listener
//! - [`forwarder`] - Egress forwarder and TCP/TLS frame writers
//! - [`tls`] - Mutual TLS policy for both transport endpoints
//! - [`metrics`] - Counter sinks (in-memory, Prometheus, batched)
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Domain-specific error types
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use telemetry_relay_core::{CounterRegistry, IngestListener};
//!
//! let metrics = Arc::new(CounterRegistry::new());
//! let (tx, mut rx) = tokio::sync::mpsc::channel(1024);
//! let listener = IngestListener::new("ingest", "0.0.0.0:3457", None, tx, metrics.clone())?;
//! listener.start().await?;
//!
//! while let Some(envelope) = rx.recv().await {
//!     // ...
//! }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod envelope;
pub mod error;
pub mod forwarder;
pub mod metrics;
pub mod network;
pub mod tls;

/// Test utilities for integration testing.
///
/// This module is only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use config::{ForwardConfig, ForwardProtocol, ListenerConfig, RelayConfig};
pub use envelope::{Envelope, EventType};
pub use error::{ConfigError, ForwarderError, FramingError, ListenerError, Result, TlsError};
pub use forwarder::{Forwarder, FrameWriter, TransportClient};
pub use metrics::{CounterRegistry, MetricSink, PrometheusSink};
pub use network::{IngestListener, ListenerOptions, ListenerState};
pub use tls::{TlsConnector, TlsMaterial, TlsServerAcceptor};

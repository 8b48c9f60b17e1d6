//! Network layer for the telemetry relay.
//!
//! This module provides:
//! - Envelope frame codec
//! - Ingestion listener accepting plain or mTLS sender connections
//! - Per-connection frame reader

pub mod client_stream;
pub mod codec;
mod connection;
pub mod listener;

pub use client_stream::PeerStream;
pub use codec::{DecodedFrame, EnvelopeCodec};
pub use listener::{IngestListener, ListenerOptions, ListenerState};

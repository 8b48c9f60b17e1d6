//! Test utilities for the telemetry relay.
//!
//! This module provides infrastructure for integration testing:
//!
//! - [`TestPki`] - A throwaway CA with listener and sender certificates
//! - [`ListenerHarness`] - A started listener with its channel and counters
//! - [`MockFrameWriter`] - A scripted forwarder client
//!
//! # Example
//!
//! ```rust,ignore
//! use telemetry_relay_core::testing::{ListenerHarness, TestPki};
//!
//! #[tokio::test]
//! async fn test_tls_ingest() {
//!     let pki = TestPki::generate();
//!     let mut harness = ListenerHarness::tls("ingest", &pki.server_material()).await;
//!
//!     // connect with pki.client_material() and send a frame...
//!
//!     assert!(harness.recv().await.is_some());
//! }
//! ```

pub mod harness;
pub mod mock_writer;
pub mod pki;

pub use harness::{ListenerHarness, WAIT_TIMEOUT};
pub use mock_writer::MockFrameWriter;
pub use pki::{TestPki, SERVER_NAME};

//! Ingestion listener.
//!
//! Binds a TCP socket (optionally wrapped in mutual TLS), accepts sender
//! connections and spawns one task per connection. Each task decodes frames
//! in order and pushes the envelopes onto a shared output channel.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──start()──▶ Started ──stop()──▶ Stopped
//!    └──────────────stop()───────────────────▲
//! ```
//!
//! `start` may succeed exactly once. Calling it again, or after `stop`,
//! returns [`ListenerError::InvalidStateTransition`]. `stop` is idempotent.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::envelope::Envelope;
use crate::error::{ListenerError, Result};
use crate::metrics::{
    listener_counter, MetricSink, RECEIVED_BYTE_COUNT, RECEIVED_MESSAGE_COUNT, RECEIVE_ERROR_COUNT,
};
use crate::tls::{TlsMaterial, TlsServerAcceptor};

use super::codec::DEFAULT_MAX_FRAME_SIZE;
use super::connection::ConnectionHandler;

/// Default time allowed for a sender to finish the TLS handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap on concurrently served connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Lifecycle state of an [`IngestListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Bound, not yet accepting.
    Created,
    /// Accept loop running.
    Started,
    /// Shut down; cannot be restarted.
    Stopped,
}

/// Per-listener tuning.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Deadline for the TLS handshake. `None` waits indefinitely.
    pub handshake_timeout: Option<Duration>,
    /// Deadline for each complete frame. `None` lets idle senders stay connected.
    pub read_timeout: Option<Duration>,
    /// Largest accepted payload length.
    pub max_frame_size: usize,
    /// Connections beyond this are closed on accept.
    pub max_connections: usize,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
            read_timeout: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Everything a connection task needs, shared behind one `Arc`.
pub(crate) struct ListenerShared {
    pub(crate) name: String,
    pub(crate) acceptor: Option<TlsServerAcceptor>,
    pub(crate) output: mpsc::Sender<Envelope>,
    pub(crate) metrics: Arc<dyn MetricSink>,
    pub(crate) options: ListenerOptions,
    pub(crate) shutdown: CancellationToken,
    pub(crate) active_connections: AtomicUsize,
    pub(crate) received_message_count: String,
    pub(crate) received_byte_count: String,
    pub(crate) receive_error_count: String,
}

/// Accepts framed envelopes from senders and forwards them to a channel.
pub struct IngestListener {
    shared: Arc<ListenerShared>,
    address: SocketAddr,
    state: Mutex<ListenerState>,
    socket: Mutex<Option<std::net::TcpListener>>,
    tracker: TaskTracker,
}

impl IngestListener {
    /// Bind a listener with default [`ListenerOptions`].
    ///
    /// # Errors
    ///
    /// Returns an error if the address is malformed, binding fails, or the
    /// TLS material cannot be loaded.
    pub fn new(
        name: impl Into<String>,
        bind_address: &str,
        tls: Option<&TlsMaterial>,
        output: mpsc::Sender<Envelope>,
        metrics: Arc<dyn MetricSink>,
    ) -> Result<Self> {
        Self::with_options(
            name,
            bind_address,
            tls,
            output,
            metrics,
            ListenerOptions::default(),
        )
    }

    /// Bind a listener with explicit options.
    ///
    /// The socket is bound immediately so [`address`](Self::address) reports
    /// the effective port, but nothing is accepted until
    /// [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_options(
        name: impl Into<String>,
        bind_address: &str,
        tls: Option<&TlsMaterial>,
        output: mpsc::Sender<Envelope>,
        metrics: Arc<dyn MetricSink>,
        options: ListenerOptions,
    ) -> Result<Self> {
        let name = name.into();

        let requested = bind_address
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ListenerError::InvalidAddress(bind_address.to_string()))?;

        let acceptor = tls.map(TlsServerAcceptor::new).transpose()?;

        let socket =
            std::net::TcpListener::bind(requested).map_err(|source| ListenerError::Bind {
                address: bind_address.to_string(),
                source,
            })?;
        socket.set_nonblocking(true)?;
        let address = socket.local_addr()?;

        debug!(listener = %name, %address, tls = acceptor.is_some(), "listener bound");

        Ok(Self {
            shared: Arc::new(ListenerShared {
                received_message_count: listener_counter(&name, RECEIVED_MESSAGE_COUNT),
                received_byte_count: listener_counter(&name, RECEIVED_BYTE_COUNT),
                receive_error_count: listener_counter(&name, RECEIVE_ERROR_COUNT),
                name,
                acceptor,
                output,
                metrics,
                options,
                shutdown: CancellationToken::new(),
                active_connections: AtomicUsize::new(0),
            }),
            address,
            state: Mutex::new(ListenerState::Created),
            socket: Mutex::new(Some(socket)),
            tracker: TaskTracker::new(),
        })
    }

    /// Listener name, used as the metric namespace.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Effective bound address.
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ListenerState {
        *self.lock_state()
    }

    /// Number of connections currently being served.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.shared.active_connections.load(Ordering::Relaxed)
    }

    /// Start accepting connections in the background.
    ///
    /// Returns as soon as the accept loop is running.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::InvalidStateTransition`] if the listener was
    /// already started or has been stopped. Callers must treat that as fatal.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.lock_state();
        if *state != ListenerState::Created {
            return Err(ListenerError::InvalidStateTransition {
                name: self.shared.name.clone(),
                from: *state,
                attempted: "start",
            });
        }

        let socket = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ListenerError::InvalidStateTransition {
                name: self.shared.name.clone(),
                from: *state,
                attempted: "start",
            })?;
        let listener = TcpListener::from_std(socket)?;
        *state = ListenerState::Started;
        drop(state);

        info!(
            listener = %self.shared.name,
            address = %self.address,
            tls = self.shared.acceptor.is_some(),
            "listener started"
        );

        let shared = Arc::clone(&self.shared);
        let tracker = self.tracker.clone();
        self.tracker
            .spawn(accept_loop(shared, listener, tracker, self.address));
        Ok(())
    }

    /// Stop accepting, cancel every connection task and wait for them to end.
    ///
    /// Safe to call more than once. Stopping a listener that was never
    /// started releases its socket and prevents a later `start`.
    pub async fn stop(&self) {
        {
            let mut state = self.lock_state();
            if *state != ListenerState::Stopped {
                info!(listener = %self.shared.name, from = ?*state, "stopping listener");
                *state = ListenerState::Stopped;
            }
        }
        drop(
            self.socket
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        self.shared.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!(listener = %self.shared.name, "listener stopped");
    }

    fn lock_state(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for IngestListener {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

#[instrument(skip(shared, listener, tracker), fields(listener = %shared.name))]
async fn accept_loop(
    shared: Arc<ListenerShared>,
    listener: TcpListener,
    tracker: TaskTracker,
    address: SocketAddr,
) {
    loop {
        tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => break,
            result = listener.accept() => {
                match result {
                    Ok((socket, peer)) => {
                        let current = shared.active_connections.load(Ordering::Relaxed);
                        if current >= shared.options.max_connections {
                            warn!(
                                %peer,
                                active = current,
                                max = shared.options.max_connections,
                                "connection rejected: limit reached"
                            );
                            continue;
                        }

                        shared.active_connections.fetch_add(1, Ordering::Relaxed);
                        debug!(%peer, active = current + 1, "accepted connection");

                        let handler = ConnectionHandler::new(Arc::clone(&shared), peer);
                        tracker.spawn(handler.run(socket));
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                    }
                }
            }
        }
    }

    debug!("accept loop exited, socket closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::CounterRegistry;

    fn listener(address: &str) -> Result<IngestListener> {
        let (tx, _rx) = mpsc::channel(8);
        IngestListener::new(
            "test",
            address,
            None,
            tx,
            Arc::new(CounterRegistry::new()),
        )
    }

    #[tokio::test]
    async fn test_binds_ephemeral_port() {
        let listener = listener("127.0.0.1:0").unwrap();
        assert_ne!(listener.address().port(), 0);
        assert_eq!(listener.state(), ListenerState::Created);
        assert_eq!(listener.name(), "test");
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let result = listener("not-an-address");
        assert!(matches!(result, Err(ListenerError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let first = listener("127.0.0.1:0").unwrap();
        let taken = first.address().to_string();

        let result = listener(&taken);
        assert!(matches!(result, Err(ListenerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_tls_material_errors_surface() {
        let (tx, _rx) = mpsc::channel(8);
        let material = TlsMaterial::new("/nonexistent/a", "/nonexistent/b", "/nonexistent/c");
        let result = IngestListener::new(
            "tls",
            "127.0.0.1:0",
            Some(&material),
            tx,
            Arc::new(CounterRegistry::new()),
        );
        assert!(matches!(result, Err(ListenerError::Tls(_))));
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid() {
        let listener = listener("127.0.0.1:0").unwrap();
        listener.start().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Started);

        let err = listener.start().await.unwrap_err();
        assert!(matches!(
            err,
            ListenerError::InvalidStateTransition {
                from: ListenerState::Started,
                ..
            }
        ));
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_start_after_stop_is_invalid() {
        let listener = listener("127.0.0.1:0").unwrap();
        listener.start().await.unwrap();
        listener.stop().await;

        let err = listener.start().await.unwrap_err();
        assert!(matches!(
            err,
            ListenerError::InvalidStateTransition {
                from: ListenerState::Stopped,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let listener = listener("127.0.0.1:0").unwrap();
        listener.start().await.unwrap();
        listener.stop().await;
        listener.stop().await;
        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let listener = listener("127.0.0.1:0").unwrap();
        listener.stop().await;
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert!(listener.start().await.is_err());
    }

    #[tokio::test]
    async fn test_stop_closes_socket() {
        let listener = listener("127.0.0.1:0").unwrap();
        let address = listener.address();
        listener.start().await.unwrap();
        listener.stop().await;

        assert!(tokio::net::TcpStream::connect(address).await.is_err());
    }
}

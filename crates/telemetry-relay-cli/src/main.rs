//! Telemetry Relay CLI
//!
//! Accepts framed telemetry envelopes on one or more listeners and, when an
//! upstream is configured, relays every received envelope to it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use telemetry_relay_core::config::{ForwardConfig, LoggingConfig, RelayConfig};
use telemetry_relay_core::envelope::Envelope;
use telemetry_relay_core::metrics::{
    CounterRegistry, FanoutSink, MetricBatcher, MetricSink, PrometheusSink,
};
use telemetry_relay_core::network::IngestListener;
use telemetry_relay_core::{Forwarder, ForwardProtocol, TlsConnector, TransportClient};

/// How long in-flight envelopes may take to drain after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Telemetry envelope relay.
#[derive(Parser)]
#[command(name = "telemetry-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Override the first listener's address.
    #[arg(long)]
    listen: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = RelayConfig::from_file(&args.config)?;

    // Apply CLI overrides
    if let Some(listen) = args.listen {
        if let Some(first) = config.listeners.first_mut() {
            first.address = listen;
        }
        config.validate()?;
    }

    // Override log level from verbosity flag
    let log_config = match args.verbose {
        0 => config.logging.clone(),
        1 => LoggingConfig {
            level: "debug".to_string(),
            ..config.logging.clone()
        },
        _ => LoggingConfig {
            level: "trace".to_string(),
            ..config.logging.clone()
        },
    };

    setup_tracing(&log_config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listeners = config.listeners.len(),
        forward = config.forward.as_ref().map(|f| f.address.as_str()),
        "starting telemetry relay"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move { run_relay(config).await })
}

fn setup_tracing(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }
}

async fn run_relay(config: RelayConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    // Counters go to an in-memory registry (for the exit summary) and to
    // Prometheus, optionally through a batcher.
    let registry = Arc::new(CounterRegistry::new());
    let prometheus = Arc::new(PrometheusSink::new());
    let sinks: Vec<Arc<dyn MetricSink>> = vec![registry.clone(), prometheus.clone()];
    let fanout: Arc<dyn MetricSink> = Arc::new(FanoutSink::new(sinks));

    let (metrics, batcher) = match config.metrics.batch_interval() {
        Some(interval) => {
            let batcher = Arc::new(MetricBatcher::new(fanout));
            let handle = batcher.clone().spawn(interval, shutdown.clone());
            (batcher as Arc<dyn MetricSink>, Some(handle))
        }
        None => (fanout, None),
    };

    if config.metrics.enabled {
        let prometheus = Arc::clone(&prometheus);
        let metrics_addr = config.metrics.address.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(&metrics_addr, prometheus).await {
                error!(error = %e, "metrics server error");
            }
        });
    }

    let forward_connector = match &config.forward {
        Some(ForwardConfig {
            protocol: ForwardProtocol::Tls,
            tls: Some(material),
            ..
        }) => Some(
            TlsConnector::new(material).context("failed to load forward TLS material")?,
        ),
        _ => None,
    };

    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let mut listeners = Vec::with_capacity(config.listeners.len());
    for listener_config in &config.listeners {
        let listener = IngestListener::with_options(
            listener_config.name.clone(),
            &listener_config.address(),
            listener_config.tls.as_ref(),
            tx.clone(),
            Arc::clone(&metrics),
            listener_config.options(),
        )
        .with_context(|| format!("failed to create listener '{}'", listener_config.name))?;

        if let Err(e) = listener.start().await {
            error!(listener = %listener_config.name, error = %e, "listener failed to start");
            return Err(e.into());
        }
        listeners.push(listener);
    }
    drop(tx);

    let consumer = match config.forward.clone() {
        Some(forward) => tokio::spawn(relay_envelopes(
            rx,
            forward,
            forward_connector,
            Arc::clone(&metrics),
        )),
        None => tokio::spawn(drain_envelopes(rx)),
    };

    shutdown_signal().await;
    info!("shutdown signal received, stopping relay");

    for listener in &listeners {
        listener.stop().await;
    }
    // Listeners hold the channel senders; dropping them lets the consumer finish.
    drop(listeners);

    if tokio::time::timeout(DRAIN_TIMEOUT, consumer).await.is_err() {
        warn!("timed out draining received envelopes");
    }

    shutdown.cancel();
    if let Some(handle) = batcher {
        let _ = handle.await;
    }

    for (name, value) in registry.snapshot() {
        info!(counter = %name, value, "final counter");
    }
    info!("relay shutdown complete");
    Ok(())
}

/// Consume envelopes when no upstream is configured.
async fn drain_envelopes(mut rx: mpsc::Receiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        trace!(
            origin = %envelope.origin,
            event_type = envelope.event_type().as_str(),
            "received envelope"
        );
    }
}

/// Relay envelopes to the upstream, reconnecting lazily after failures.
async fn relay_envelopes(
    mut rx: mpsc::Receiver<Envelope>,
    config: ForwardConfig,
    connector: Option<TlsConnector>,
    metrics: Arc<dyn MetricSink>,
) {
    let address = config.address();
    let forwarder = Forwarder::new(config.protocol.label(), metrics);
    let mut client: Option<TransportClient> = None;

    while let Some(envelope) = rx.recv().await {
        if client.is_none() {
            match TransportClient::connect(
                &address,
                connector.as_ref(),
                config.server_name.as_deref(),
                config.connect_timeout(),
            )
            .await
            {
                Ok(connected) => {
                    client = Some(connected.with_write_timeout(config.write_timeout()));
                }
                Err(e) => {
                    warn!(
                        address = %address,
                        error = %e,
                        "upstream unavailable, dropping envelope"
                    );
                    continue;
                }
            }
        }

        if let Some(upstream) = client.as_mut() {
            if let Err(e) = forwarder.forward(upstream, &envelope).await {
                debug!(error = %e, "upstream connection closed, reconnecting on next envelope");
                client = None;
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

async fn start_metrics_server(
    addr: &str,
    metrics: Arc<PrometheusSink>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!(address = %addr, "metrics server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = Arc::clone(&metrics);

        tokio::spawn(async move {
            let service = service_fn(move |_req: Request<hyper::body::Incoming>| {
                let metrics = Arc::clone(&metrics);
                async move {
                    let body = metrics.encode().unwrap_or_default();
                    Ok::<_, hyper::Error>(Response::new(Full::new(Bytes::from(body))))
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(error = %e, "metrics connection error");
            }
        });
    }
}

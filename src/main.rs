//! Block Device Plugin daemon
//!
//! Runs the kubelet device plugin under a supervisor loop:
//!
//! ```text
//!   serve (retried with backoff) ──► running ──► SIGINT/SIGTERM/SIGHUP/SIGQUIT ──► stop, exit
//!          ▲                            │
//!          └──── socket lost / stop ◄───┘
//! ```
//!
//! The discovery cache and usage ledger live for the whole process and are
//! shared by every restart.

use anyhow::Context;
use backoff::ExponentialBackoff;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use block_device_plugin::plugin::{
    DEFAULT_RESOURCE_NAME, DEFAULT_SOCKET_NAME, DEVICE_PLUGIN_PATH, HEALTH_CHECK_INTERVAL,
};
use block_device_plugin::{
    DeviceEngine, Error, FileConfigSource, KubeletRegistrar, Lifecycle, PluginMetrics,
    PluginServer, PluginServerConfig, ScannerConfig, SysfsScanner, DEFAULT_CONFIG_PATH,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Block Device Plugin - shares host block devices with containers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Device plugin configuration file (JSON)
    #[arg(long, env = "CONFIG_PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Kubelet device plugin directory
    #[arg(long, env = "DEVICE_PLUGIN_PATH", default_value = DEVICE_PLUGIN_PATH)]
    plugin_dir: PathBuf,

    /// Socket file name inside the plugin directory
    #[arg(long, env = "PLUGIN_SOCKET", default_value = DEFAULT_SOCKET_NAME)]
    socket_name: String,

    /// Extended resource name advertised to the kubelet
    #[arg(long, env = "RESOURCE_NAME", default_value = DEFAULT_RESOURCE_NAME)]
    resource_name: String,

    /// Root of the sysfs mount used for device discovery
    #[arg(long, env = "SYSFS_ROOT", default_value = "/sys")]
    sysfs_root: PathBuf,

    /// Socket health check interval (e.g. 10s, 1m)
    #[arg(long, env = "HEALTH_CHECK_INTERVAL", value_parser = humantime::parse_duration)]
    health_interval: Option<Duration>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Block Device Plugin");
    info!("  Version: {}", block_device_plugin::VERSION);
    info!("  Config: {}", args.config.display());
    info!("  Plugin dir: {}", args.plugin_dir.display());
    info!("  Socket: {}", args.socket_name);
    info!("  Resource: {}", args.resource_name);

    let metrics = Arc::new(PluginMetrics::new().context("creating metrics")?);

    let scanner = Arc::new(SysfsScanner::new(ScannerConfig {
        sysfs_path: args.sysfs_root.clone(),
        ..Default::default()
    }));
    let config_source = Arc::new(FileConfigSource::new(&args.config));
    let engine = Arc::new(DeviceEngine::new(scanner, config_source, metrics.clone()));

    let server_config = PluginServerConfig {
        plugin_dir: args.plugin_dir.clone(),
        socket_name: args.socket_name.clone(),
        resource_name: args.resource_name.clone(),
        health_interval: args.health_interval.unwrap_or(HEALTH_CHECK_INTERVAL),
        ..Default::default()
    };
    let registrar = Arc::new(KubeletRegistrar::new(server_config.kubelet_socket()));
    let server = PluginServer::new(server_config, engine, registrar);

    let ready = Arc::new(AtomicBool::new(false));

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_ready = ready.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_ready).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let registry = metrics.registry().clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, registry).await {
            error!("Metrics server error: {}", e);
        }
    });

    let mut signals = ShutdownSignals::new().context("installing signal handlers")?;

    loop {
        let lifecycle = tokio::select! {
            name = signals.recv() => {
                info!("Received {}, exiting before plugin start", name);
                return Ok(());
            }
            lifecycle = serve_with_retry(&server) => lifecycle.context("starting device plugin")?,
        };
        ready.store(true, Ordering::SeqCst);

        tokio::select! {
            name = signals.recv() => {
                info!("Received {}, shutting down", name);
                ready.store(false, Ordering::SeqCst);
                server.stop().await.context("stopping device plugin")?;
                break;
            }
            _ = PluginServer::stopped(&lifecycle) => {
                ready.store(false, Ordering::SeqCst);
                info!("Device plugin stopped, restarting");
                if let Err(e) = server.stop().await {
                    warn!("Cleanup before restart failed: {}", e);
                }
            }
        }
    }

    info!("Device plugin shutdown complete");
    Ok(())
}

/// Run `serve` until it succeeds, backing off between attempts.
///
/// Errors that a retry cannot clear end the process instead.
async fn serve_with_retry(server: &PluginServer) -> Result<Arc<Lifecycle>, Error> {
    let policy = ExponentialBackoff {
        initial_interval: Duration::from_secs(1),
        max_interval: Duration::from_secs(30),
        max_elapsed_time: None,
        ..Default::default()
    };

    backoff::future::retry_notify(
        policy,
        move || async move {
            server.serve().await.map_err(|e| {
                if e.is_retryable() {
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        },
        |e: Error, wait: Duration| {
            warn!("Device plugin failed to start ({:?}): {}; retrying in {:?}", e.class(), e, wait)
        },
    )
    .await
}

// =============================================================================
// Signals
// =============================================================================

struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
    quit: Signal,
}

impl ShutdownSignals {
    fn new() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.hangup.recv() => "SIGHUP",
            _ = self.quit.recv() => "SIGQUIT",
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["h2=warn", "hyper=warn", "tower=warn", "tonic=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: hyper::StatusCode, body: impl Into<hyper::Body>) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str, ready: Arc<AtomicBool>) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.load(Ordering::SeqCst);
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" if ready => text_response(StatusCode::OK, "ok"),
                        "/readyz" => text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid health server address {}", addr))?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .context("health server")?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, registry: prometheus::Registry) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => {
                            let encoder = TextEncoder::new();
                            let mut buffer = Vec::new();
                            match encoder.encode(&registry.gather(), &mut buffer) {
                                Ok(()) => {
                                    let mut response = text_response(StatusCode::OK, buffer);
                                    if let Ok(value) =
                                        hyper::header::HeaderValue::from_str(encoder.format_type())
                                    {
                                        response
                                            .headers_mut()
                                            .insert(hyper::header::CONTENT_TYPE, value);
                                    }
                                    response
                                }
                                Err(e) => text_response(
                                    StatusCode::INTERNAL_SERVER_ERROR,
                                    e.to_string(),
                                ),
                            }
                        }
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics server address {}", addr))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .context("metrics server")?;

    Ok(())
}

//! Qtree Pool Operator
//!
//! Runs the qtree pooling control plane: the REST API, the health and
//! metrics servers, and the background housekeeping of every driver.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use qtree_pool_operator::{
    ApiServer, ApiServerConfig, EconomyConfig, Orchestrator, OrchestratorConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Qtree Pool Operator - packs quota-limited qtrees into shared Flexvols
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Driver configuration file (YAML)
    #[arg(long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Storage prefix used to scope Flexvol names
    #[arg(long, env = "STORAGE_PREFIX")]
    storage_prefix: Option<String>,

    /// Array client backend
    #[arg(long, env = "BACKEND", default_value = "simulated")]
    backend: String,

    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

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

    init_logging(&args)?;

    info!("Starting Qtree Pool Operator");
    info!("  Version: {}", qtree_pool_operator::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  Backend: {}", args.backend);

    let mut economy = match &args.config {
        Some(path) => EconomyConfig::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EconomyConfig::default(),
    };
    if let Some(prefix) = &args.storage_prefix {
        economy.storage_prefix = prefix.clone();
    }
    info!("  Storage prefix: {}", economy.storage_prefix);

    let mut orch_config = OrchestratorConfig::default();
    orch_config.client = args.backend.clone();
    orch_config.backends.economy = economy;

    let orchestrator = Orchestrator::new(orch_config);
    orchestrator
        .initialize()
        .await
        .context("initializing orchestrator")?;
    orchestrator.start_housekeeping().await;

    // Start health server
    let health_addr: SocketAddr = args
        .health_addr
        .parse()
        .context("invalid health server address")?;
    let health_orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, health_orchestrator).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr: SocketAddr = args
        .metrics_addr
        .parse()
        .context("invalid metrics server address")?;
    let metrics_orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, metrics_orchestrator).await {
            error!("Metrics server error: {}", e);
        }
    });

    let api_config = ApiServerConfig {
        rest_addr: args.api_addr.parse().context("invalid REST API address")?,
        ..Default::default()
    };
    let api_server = Arc::new(ApiServer::new(api_config, orchestrator.clone()));

    let server = api_server.clone();
    let mut api_task = tokio::spawn(async move { server.run().await });

    tokio::select! {
        result = &mut api_task => {
            orchestrator.shutdown().await;
            result.context("API server task failed")??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for ctrl-c: {}", e);
            }
            info!("Shutdown signal received");
        }
    }

    api_server.shutdown();
    if let Err(e) = api_task.await.context("API server task failed")? {
        warn!("API server stopped with error: {}", e);
    }
    orchestrator.shutdown().await;

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("tower=warn".parse()?)
        .add_directive("tower_http=info".parse()?)
        .add_directive("axum=info".parse()?);

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

    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: hyper::StatusCode, body: impl Into<hyper::Body>) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: SocketAddr, orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let orchestrator = orchestrator.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let ready = orchestrator.is_ready();
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

    info!("Health server listening on {}", addr);
    Server::try_bind(&addr)
        .context("binding health server")?
        .serve(make_svc)
        .await
        .context("health server")?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

/// Copy every driver's counters into the gauge family
async fn refresh_driver_gauges(orchestrator: &Orchestrator, gauges: &prometheus::IntGaugeVec) {
    match orchestrator.driver_status().await {
        Ok(statuses) => {
            for status in statuses {
                for (counter, value) in &status.counters {
                    gauges
                        .with_label_values(&[status.name.as_str(), counter.as_str()])
                        .set(i64::try_from(*value).unwrap_or(i64::MAX));
                }
                gauges
                    .with_label_values(&[status.name.as_str(), "flexvols"])
                    .set(status.containers.len() as i64);
                gauges
                    .with_label_values(&[status.name.as_str(), "pending_resizes"])
                    .set(status.pending_resizes.len() as i64);
            }
        }
        Err(e) => warn!("Could not collect driver status: {}", e),
    }
}

async fn run_metrics_server(addr: SocketAddr, orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let gauges = prometheus::register_int_gauge_vec!(
        "qtree_pool_driver",
        "Storage driver counters and pool sizes",
        &["driver", "metric"]
    )
    .context("registering driver gauges")?;

    let make_svc = make_service_fn(move |_conn| {
        let orchestrator = orchestrator.clone();
        let gauges = gauges.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let orchestrator = orchestrator.clone();
                let gauges = gauges.clone();
                async move {
                    if req.uri().path() != "/metrics" {
                        return Ok(text_response(StatusCode::NOT_FOUND, "not found"));
                    }

                    refresh_driver_gauges(&orchestrator, &gauges).await;

                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    let response = match encoder.encode(&prometheus::gather(), &mut buffer) {
                        Ok(()) => {
                            let mut response = text_response(StatusCode::OK, buffer);
                            if let Ok(value) = encoder.format_type().parse() {
                                response
                                    .headers_mut()
                                    .insert(hyper::header::CONTENT_TYPE, value);
                            }
                            response
                        }
                        Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .context("binding metrics server")?
        .serve(make_svc)
        .await
        .context("metrics server")?;

    Ok(())
}

//! Manila CSI Operator
//!
//! Detects Manila in the OpenStack cloud the cluster runs on and manages
//! the Manila StorageClasses and CSI driver registration.

use clap::Parser;
use kube::Client;
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use manila_csi_operator::controlplane::platform::{
    merge_triggers, operator_triggers, storage_class_reflector, KubeOperatorStatusStore,
    KubeStorageClassStore, OpenStackClient, OpenStackConfig,
};
use manila_csi_operator::{
    ControllerMetrics, CsiDriverController, Error, ManilaController, ManilaControllerConfig,
    Result, StorageClassConfig,
};
use manila_csi_operator::domain::ports::RunnableRef;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Manila CSI Operator - Manila detection and StorageClass management
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the cluster-scoped ManilaDriver object
    #[arg(long, env = "OPERATOR_NAME", default_value = "cluster")]
    operator_name: String,

    /// Path to clouds.yaml
    #[arg(long, env = "OS_CLIENT_CONFIG_FILE", default_value = "/etc/openstack/clouds.yaml")]
    clouds_file: String,

    /// Cloud entry in clouds.yaml
    #[arg(long, env = "OS_CLOUD", default_value = "openstack")]
    cloud: String,

    /// Prefix of generated StorageClass names
    #[arg(long, env = "STORAGE_CLASS_PREFIX", default_value = "csi-manila-")]
    storage_class_prefix: String,

    /// CSI provisioner name
    #[arg(long, env = "PROVISIONER", default_value = "manila.csi.openstack.org")]
    provisioner: String,

    /// Secret holding OpenStack credentials for the CSI driver
    #[arg(long, env = "SECRET_NAME", default_value = "csi-manila-secrets")]
    secret_name: String,

    /// Namespace of the credentials secret
    #[arg(long, env = "SECRET_NAMESPACE", default_value = "openshift-manila-csi-driver")]
    secret_namespace: String,

    /// Resync interval in seconds
    #[arg(
        long,
        env = "RESYNC_INTERVAL",
        default_value = "60",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    resync_interval_secs: u64,

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
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting {}", manila_csi_operator::NAME);
    info!("  Version: {}", manila_csi_operator::VERSION);
    info!("  Operator object: {}", args.operator_name);
    info!("  Cloud: {} ({})", args.cloud, args.clouds_file);

    let health_addr = parse_addr(&args.health_addr, "health")?;
    let metrics_addr = parse_addr(&args.metrics_addr, "metrics")?;
    let resync_interval = Duration::from_secs(args.resync_interval_secs);

    let client = Client::try_default().await?;

    let openstack = OpenStackConfig::from_clouds_file(&args.clouds_file, &args.cloud)?;
    let share_types = Arc::new(OpenStackClient::new(openstack)?);

    let (class_cache, class_triggers) = storage_class_reflector(client.clone());
    let storage_classes = Arc::new(KubeStorageClassStore::new(client.clone(), class_cache));
    let status_store = Arc::new(KubeOperatorStatusStore::new(
        client.clone(),
        args.operator_name.clone(),
    ));

    let registry = Registry::new();
    let metrics = Arc::new(ControllerMetrics::new(&registry)?);

    let csi_driver: RunnableRef = Arc::new(CsiDriverController::new(
        client.clone(),
        args.provisioner.clone(),
        resync_interval,
    ));

    let config = ManilaControllerConfig {
        resync_interval,
        storage_class: StorageClassConfig {
            name_prefix: args.storage_class_prefix.clone(),
            provisioner: args.provisioner.clone(),
            secret_name: args.secret_name.clone(),
            secret_namespace: args.secret_namespace.clone(),
        },
        ..Default::default()
    };
    config.validate()?;

    let controller = Arc::new(ManilaController::new(
        config,
        status_store,
        share_types,
        storage_classes,
        vec![csi_driver],
        metrics,
    ));

    let cancel = CancellationToken::new();

    // Start health server
    let ready = controller.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, ready).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, registry).await {
            error!("Metrics server error: {}", e);
        }
    });

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        shutdown.cancel();
    });

    let triggers = merge_triggers(vec![
        class_triggers,
        operator_triggers(client, &args.operator_name),
    ]);
    controller.run(triggers, cancel).await;

    info!("Operator shutdown complete");
    Ok(())
}

fn parse_addr(addr: &str, server: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} server address: {}", server, e)))
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
    for directive in ["hyper=warn", "kube=info", "reqwest=warn"] {
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

fn text_response(status: hyper::StatusCode, body: &'static str) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(hyper::Body::from(body));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: SocketAddr, controller: Arc<ManilaController>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let controller = controller.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let synced = controller.has_synced();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" if synced => text_response(StatusCode::OK, "ok"),
                        "/readyz" => text_response(StatusCode::SERVICE_UNAVAILABLE, "not synced"),
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, registry: Registry) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move {
                    if req.uri().path() != "/metrics" {
                        return Ok::<_, std::convert::Infallible>(text_response(
                            StatusCode::NOT_FOUND,
                            "not found",
                        ));
                    }

                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
                        error!("Failed to encode metrics: {}", e);
                        return Ok(text_response(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "failed to encode metrics",
                        ));
                    }

                    let mut response = Response::new(Body::from(buffer));
                    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
                        response.headers_mut().insert(CONTENT_TYPE, content_type);
                    }
                    Ok(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}

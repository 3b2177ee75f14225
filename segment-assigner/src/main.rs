use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use segment_assigner::config::Config;
use segment_assigner::health::{self, ComponentStatus, HealthRegistry};
use segment_assigner::rebalancer::TableRebalancer;
use segment_assigner::store::{EtcdAssignmentStore, StoreConfig};

const HEALTH_DEADLINE: Duration = Duration::from_secs(30);
const HEALTH_REPORT_INTERVAL: Duration = Duration::from_secs(10);

async fn shutdown_signal(cancel: CancellationToken) -> std::io::Result<()> {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
        _ = cancel.cancelled() => return Ok(()),
    };

    tracing::info!("Shutting down gracefully...");
    cancel.cancel();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::init_from_env()?;

    // Initialize tracing
    let log_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(log_layer)
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    tracing::info!("Starting segment-assigner");
    tracing::info!("Table: {}", config.table_name);
    tracing::info!("etcd endpoints: {}", config.etcd_endpoints);
    tracing::info!("Rebalance options: {:?}", config.rebalance_options());

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = shutdown_signal(cancel.clone()).await {
                tracing::error!(error = %e, "failed to register signal handlers");
                cancel.cancel();
            }
        }
    });

    // Start HTTP server for metrics and health checks
    let liveness = HealthRegistry::new("liveness");
    let readiness = HealthRegistry::new("readiness");
    tokio::spawn(health::report_until_cancelled(
        liveness.register("main_loop", HEALTH_DEADLINE),
        HEALTH_REPORT_INTERVAL,
        cancel.clone(),
    ));
    let rebalancer_health = readiness.register("rebalancer", HEALTH_DEADLINE);
    let router = health::router(liveness, readiness, health::setup_metrics_recorder()?);
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    tracing::info!("Health server listening on {}", config.bind_address());
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    let store = EtcdAssignmentStore::connect(StoreConfig {
        endpoints: config.etcd_endpoint_list(),
        prefix: config.etcd_prefix.clone(),
    })
    .await?;
    tracing::info!("Connected to etcd, prefix {}", store.prefix());
    let reporter_cancel = cancel.child_token();
    let reporter = tokio::spawn(health::report_until_cancelled(
        rebalancer_health.clone(),
        HEALTH_REPORT_INTERVAL,
        reporter_cancel.clone(),
    ));

    let rebalancer =
        TableRebalancer::new(Arc::new(store), &config.table_name, config.rebalancer_config());
    let result = rebalancer.run(cancel.clone()).await;

    reporter_cancel.cancel();
    reporter.await?;
    rebalancer_health.report_status(ComponentStatus::Unhealthy);
    cancel.cancel();
    server.await??;

    result?;
    Ok(())
}

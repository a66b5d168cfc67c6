use crate::cli::ServeArgs;
use crate::infra::{build_service, AppState};
use crate::routes::with_voting_routes;
use crate::sweeper::{spawn_resolution_consumer, spawn_sweeper};
use athlete_vote::config::AppConfig;
use athlete_vote::error::AppError;
use athlete_vote::telemetry;
use athlete_vote::voting::{InProcessNotifier, SystemClock};
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let notifier = Arc::new(InProcessNotifier::with_capacity(
        config.voting.notifier_capacity,
    ));
    let service = build_service(&config.voting, notifier.clone(), Arc::new(SystemClock));

    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        notifier: notifier.clone(),
        shutdown: shutdown_rx.clone(),
    };

    let sweeper = spawn_sweeper(
        service.clone(),
        config.voting.sweep_interval(),
        shutdown_rx.clone(),
    );
    let consumer = spawn_resolution_consumer(&notifier, shutdown_rx)?;

    let app = with_voting_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        approval_threshold = config.voting.approval_threshold,
        minimum_quorum = config.voting.minimum_quorum,
        "community voting service ready"
    );

    let draining = shutdown_tx.clone();
    let readiness = readiness_flag.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            readiness.store(false, Ordering::Release);
            let _ = draining.send(true);
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(err) = sweeper.await {
        warn!(%err, "resolution sweeper ended abnormally");
    }
    match consumer.await {
        Ok(forwarded) => info!(forwarded, "resolution consumer stopped"),
        Err(err) => warn!(%err, "resolution consumer ended abnormally"),
    }

    info!("community voting service stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received, draining"),
        Err(err) => {
            warn!(%err, "unable to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

use crate::cli::ServeArgs;
use crate::infra::{build_runtime, AppState};
use crate::routes::with_fundraiser_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use repquest::config::AppConfig;
use repquest::error::AppError;
use repquest::telemetry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
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
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let runtime = build_runtime(&config)?;
    let dispatcher = tokio::spawn(runtime.dispatcher.clone().run(runtime.queue));

    let app = with_fundraiser_routes(runtime.service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        missing_progress = config.settlement.missing_progress.label(),
        "repquest fundraising api ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    readiness_flag.store(false, Ordering::Release);

    // Routes are gone, so every outbox handle has been dropped.
    match dispatcher.await {
        Ok(summary) => info!(
            delivered = summary.delivered,
            failed = summary.failed,
            "pending notifications drained"
        ),
        Err(err) => warn!(error = %err, "notification dispatcher task aborted"),
    }
    let failed = runtime.dispatcher.failed_deliveries();
    if !failed.is_empty() {
        warn!(count = failed.len(), "notifications need manual resend");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

use crate::cli::ServeArgs;
use crate::infra::{AppState, LogNotifier};
use crate::routes::with_query_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use query_desk::config::AppConfig;
use query_desk::error::AppError;
use query_desk::telemetry;
use query_desk::workflows::queries::{InMemoryQueryStore, QueryDeskService};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

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
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let query_service = Arc::new(QueryDeskService::new(
        Arc::new(InMemoryQueryStore::new()),
        Arc::new(LogNotifier),
        config.workflow.priority.clone(),
    ));

    let app = with_query_routes(query_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        high_amount = config.workflow.priority.high_amount_threshold,
        medium_amount = config.workflow.priority.medium_amount_threshold,
        "query desk ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

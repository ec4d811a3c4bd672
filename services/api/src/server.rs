use crate::cli::ServeArgs;
use crate::infra::{reference_factors, seeded_store, AppState, InMemoryFactorTable};
use crate::routes::with_calculation_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use carbon_engine::calculation::CalculationService;
use carbon_engine::config::AppConfig;
use carbon_engine::error::AppError;
use carbon_engine::ingest::emission_factors_from_path;
use carbon_engine::telemetry;
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

    let factors = match args.factors.take() {
        Some(path) => {
            let factors = emission_factors_from_path(&path)?;
            info!(path = %path.display(), count = factors.len(), "loaded emission factor table");
            factors
        }
        None => reference_factors(),
    };

    let calculation_service = Arc::new(CalculationService::new(
        Arc::new(seeded_store()),
        Arc::new(InMemoryFactorTable::new(factors)),
        config.engine.clone(),
    ));

    let app = with_calculation_routes(calculation_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        hot_spot_limit = config.engine.hot_spot_limit,
        "emissions calculation engine ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tracing::error;

use super::domain::{ActivityId, CalculationResult, ProjectId};
use super::options::CalculationOptions;
use super::repository::{EmissionFactorStore, LedgerStore};
use super::service::{CalculationError, CalculationService, FootprintBoundary};

type SharedService<S, F> = Arc<CalculationService<S, F>>;

/// Router builder exposing the recalculation and footprint endpoints.
pub fn calculation_router<S, F>(service: SharedService<S, F>) -> Router
where
    S: LedgerStore + 'static,
    F: EmissionFactorStore + 'static,
{
    Router::new()
        .route(
            "/api/v1/projects/:project_id/calculations",
            post(recalculate_all_handler::<S, F>),
        )
        .route(
            "/api/v1/projects/:project_id/calculations/latest",
            get(latest_result_handler::<S, F>),
        )
        .route(
            "/api/v1/projects/:project_id/activities/:activity_id/calculations",
            post(recalculate_activity_handler::<S, F>),
        )
        .route(
            "/api/v1/projects/:project_id/footprints/organization",
            post(organization_footprint_handler::<S, F>),
        )
        .route(
            "/api/v1/projects/:project_id/footprints/products/:product",
            post(product_footprint_handler::<S, F>),
        )
        .with_state(service)
}

pub(crate) async fn recalculate_all_handler<S, F>(
    State(service): State<SharedService<S, F>>,
    Path(project_id): Path<String>,
    body: Bytes,
) -> Response
where
    S: LedgerStore + 'static,
    F: EmissionFactorStore + 'static,
{
    let options = match parse_options(&body) {
        Ok(options) => options,
        Err(response) => return response,
    };
    let project_id = ProjectId(project_id);
    respond(
        tokio::task::spawn_blocking(move || service.recalculate_all(&project_id, options)).await,
    )
}

pub(crate) async fn recalculate_activity_handler<S, F>(
    State(service): State<SharedService<S, F>>,
    Path((project_id, activity_id)): Path<(String, String)>,
) -> Response
where
    S: LedgerStore + 'static,
    F: EmissionFactorStore + 'static,
{
    let project_id = ProjectId(project_id);
    let activity_id = ActivityId(activity_id);
    respond(
        tokio::task::spawn_blocking(move || {
            service.recalculate_activity(&project_id, &activity_id)
        })
        .await,
    )
}

pub(crate) async fn latest_result_handler<S, F>(
    State(service): State<SharedService<S, F>>,
    Path(project_id): Path<String>,
) -> Response
where
    S: LedgerStore + 'static,
    F: EmissionFactorStore + 'static,
{
    respond(Ok(service.get_latest_result(&ProjectId(project_id))))
}

pub(crate) async fn organization_footprint_handler<S, F>(
    State(service): State<SharedService<S, F>>,
    Path(project_id): Path<String>,
    body: Bytes,
) -> Response
where
    S: LedgerStore + 'static,
    F: EmissionFactorStore + 'static,
{
    footprint(service, project_id, FootprintBoundary::Organization, &body).await
}

pub(crate) async fn product_footprint_handler<S, F>(
    State(service): State<SharedService<S, F>>,
    Path((project_id, product)): Path<(String, String)>,
    body: Bytes,
) -> Response
where
    S: LedgerStore + 'static,
    F: EmissionFactorStore + 'static,
{
    footprint(service, project_id, FootprintBoundary::Product(product), &body).await
}

async fn footprint<S, F>(
    service: SharedService<S, F>,
    project_id: String,
    boundary: FootprintBoundary,
    body: &Bytes,
) -> Response
where
    S: LedgerStore + 'static,
    F: EmissionFactorStore + 'static,
{
    let options = match parse_options(body) {
        Ok(options) => options,
        Err(response) => return response,
    };
    let project_id = ProjectId(project_id);
    respond(
        tokio::task::spawn_blocking(move || {
            service.calculate_footprint(&project_id, &boundary, options)
        })
        .await,
    )
}

fn parse_options(body: &Bytes) -> Result<CalculationOptions, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CalculationOptions::default());
    }

    serde_json::from_slice(body).map_err(|err| {
        let payload = json!({
            "error": format!("invalid calculation options: {err}"),
        });
        (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
    })
}

fn respond(
    joined: Result<Result<CalculationResult, CalculationError>, tokio::task::JoinError>,
) -> Response {
    match joined {
        Ok(Ok(result)) => (StatusCode::OK, axum::Json(result)).into_response(),
        Ok(Err(err)) => error_response(err),
        Err(join_error) => {
            error!(error = %join_error, "calculation task aborted");
            let payload = json!({
                "error": "calculation task aborted",
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) fn error_response(err: CalculationError) -> Response {
    let status = match &err {
        CalculationError::ProjectNotFound(_)
        | CalculationError::ActivityNotFound { .. }
        | CalculationError::NotComputedYet(_) => StatusCode::NOT_FOUND,
        CalculationError::RecalculationInProgress(_) => StatusCode::CONFLICT,
        CalculationError::CalculationFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let payload = json!({
        "error": err.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{FundraiserId, PlayerId};
use super::export::pledge_csv;
use super::progress::ProgressError;
use super::repository::RepositoryError;
use super::service::{FundraiserService, FundraiserServiceError, LaunchFundraiser, PledgeRequest};
use super::settlement::SettlementError;

#[derive(Debug, Clone, Deserialize)]
pub struct PointsEvent {
    pub player_id: PlayerId,
    pub points_earned: i64,
}

/// Router exposing fundraiser launch, pledging, progress and settlement.
pub fn fundraiser_router(service: Arc<FundraiserService>) -> Router {
    Router::new()
        .route("/api/v1/fundraisers", post(launch_handler))
        .route("/api/v1/fundraisers/sweep", post(sweep_handler))
        .route("/api/v1/fundraisers/:fundraiser_id", get(standing_handler))
        .route(
            "/api/v1/fundraisers/:fundraiser_id/pledges",
            post(pledge_handler),
        )
        .route(
            "/api/v1/fundraisers/:fundraiser_id/pledges.csv",
            get(export_handler),
        )
        .route(
            "/api/v1/fundraisers/:fundraiser_id/finalize",
            post(finalize_handler),
        )
        .route("/api/v1/points", post(points_handler))
        .with_state(service)
}

pub(crate) async fn launch_handler(
    State(service): State<Arc<FundraiserService>>,
    axum::Json(request): axum::Json<LaunchFundraiser>,
) -> Response {
    match service.launch(request).await {
        Ok(launched) => (StatusCode::CREATED, axum::Json(launched)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn standing_handler(
    State(service): State<Arc<FundraiserService>>,
    Path(fundraiser_id): Path<String>,
) -> Response {
    match service.standing(&FundraiserId(fundraiser_id)).await {
        Ok(standing) => (StatusCode::OK, axum::Json(standing)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn pledge_handler(
    State(service): State<Arc<FundraiserService>>,
    Path(fundraiser_id): Path<String>,
    axum::Json(request): axum::Json<PledgeRequest>,
) -> Response {
    match service
        .submit_pledge(&FundraiserId(fundraiser_id), request)
        .await
    {
        Ok(pledge) => (StatusCode::CREATED, axum::Json(pledge)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn export_handler(
    State(service): State<Arc<FundraiserService>>,
    Path(fundraiser_id): Path<String>,
) -> Response {
    let rows = match service.export(&FundraiserId(fundraiser_id)).await {
        Ok(rows) => rows,
        Err(err) => return error_response(err),
    };

    match pledge_csv(&rows) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => {
            let payload = json!({ "error": format!("export failed: {err}") });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn points_handler(
    State(service): State<Arc<FundraiserService>>,
    axum::Json(event): axum::Json<PointsEvent>,
) -> Response {
    match service
        .record_points(&event.player_id, event.points_earned)
        .await
    {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn sweep_handler(State(service): State<Arc<FundraiserService>>) -> Response {
    match service.sweep().await {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn finalize_handler(
    State(service): State<Arc<FundraiserService>>,
    Path(fundraiser_id): Path<String>,
) -> Response {
    match service.finalize(&FundraiserId(fundraiser_id)).await {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: FundraiserServiceError) -> Response {
    let status = match &err {
        FundraiserServiceError::Validation(_)
        | FundraiserServiceError::Progress(ProgressError::NegativePoints(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        FundraiserServiceError::NotFound(_)
        | FundraiserServiceError::Repository(RepositoryError::NotFound)
        | FundraiserServiceError::Settlement(SettlementError::NotFound(_)) => StatusCode::NOT_FOUND,
        FundraiserServiceError::Repository(RepositoryError::Conflict)
        | FundraiserServiceError::Settlement(SettlementError::NotDue { .. }) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let payload = json!({
        "error": err.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}

use axum::{extract::State, Extension, Json};

use crate::jobs::{IndexAnnotation, RouteOutcome, StageDrain};
use crate::middleware::RequestId;

use super::{map_db_error, ApiError, ApiResponse, AppState, ResponseMeta};

/// `POST /api/v1/pipeline/preprocess` — drain one batch from every
/// configured queue stage into its index.
pub(super) async fn preprocess(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Vec<StageDrain>>>, ApiError> {
    let outcomes = state.ctx.preprocess_all().await.map_err(|e| {
        let murmur_pipeline::PipelineError::Store(db) = &e;
        map_db_error(req_id.0.clone(), db)
    })?;

    Ok(Json(ApiResponse {
        data: outcomes,
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// `POST /api/v1/pipeline/routes` — run one bounded pass of every keyword
/// route.
pub(super) async fn run_routes(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Vec<RouteOutcome>>>, ApiError> {
    let outcomes = state.ctx.run_routes().await.map_err(|e| {
        let murmur_pipeline::PipelineError::Store(db) = &e;
        map_db_error(req_id.0.clone(), db)
    })?;

    Ok(Json(ApiResponse {
        data: outcomes,
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// `POST /api/v1/pipeline/annotate` — run one annotation pass over every
/// index.
pub(super) async fn annotate(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Vec<IndexAnnotation>>>, ApiError> {
    let outcomes = state.ctx.annotate_all().await.map_err(|e| match e {
        murmur_sentiment::SentimentError::Store(db) => map_db_error(req_id.0.clone(), &db),
        other => ApiError::new(req_id.0.clone(), "internal_error", other.to_string()),
    })?;

    Ok(Json(ApiResponse {
        data: outcomes,
        meta: ResponseMeta::new(req_id.0),
    }))
}

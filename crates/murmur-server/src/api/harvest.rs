use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;

use murmur_core::Direction;
use murmur_harvest::{CommentReport, TickReport};

use crate::middleware::RequestId;

use super::{map_harvest_error, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
pub(super) struct DirectionQuery {
    direction: Option<String>,
}

fn parse_direction(query: &DirectionQuery, request_id: &str) -> Result<Direction, ApiError> {
    match &query.direction {
        None => Ok(Direction::Newer),
        Some(raw) => raw
            .parse()
            .map_err(|reason: String| ApiError::new(request_id, "validation_error", reason)),
    }
}

/// `POST /api/v1/harvest/reddit/{subreddit}` — run one harvest tick for a
/// configured subreddit. `?direction=older|newer` defaults to newer.
pub(super) async fn harvest_reddit(
    State(state): State<AppState>,
    Path(subreddit): Path<String>,
    Query(query): Query<DirectionQuery>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<TickReport>>, ApiError> {
    let cfg = state
        .ctx
        .sources
        .reddit
        .iter()
        .find(|cfg| cfg.subreddit == subreddit)
        .ok_or_else(|| {
            ApiError::new(
                req_id.0.clone(),
                "not_found",
                format!("subreddit {subreddit} is not configured"),
            )
        })?;
    let direction = parse_direction(&query, &req_id.0)?;

    let report = state
        .ctx
        .harvest_reddit(cfg, direction)
        .await
        .map_err(|e| map_harvest_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: report,
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// `POST /api/v1/harvest/mastodon/{host}` — run one harvest tick for a
/// configured Mastodon server, addressed by its host.
pub(super) async fn harvest_mastodon(
    State(state): State<AppState>,
    Path(host): Path<String>,
    Query(query): Query<DirectionQuery>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<TickReport>>, ApiError> {
    let cfg = state
        .ctx
        .sources
        .mastodon
        .iter()
        .find(|cfg| cfg.source_key() == format!("mastodon:{host}"))
        .ok_or_else(|| {
            ApiError::new(
                req_id.0.clone(),
                "not_found",
                format!("mastodon server {host} is not configured"),
            )
        })?;
    let direction = parse_direction(&query, &req_id.0)?;

    let report = state
        .ctx
        .harvest_mastodon(cfg, direction)
        .await
        .map_err(|e| map_harvest_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: report,
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// `POST /api/v1/harvest/comments` — drain one batch of the comment backlog.
pub(super) async fn harvest_comments(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<CommentReport>>, ApiError> {
    let report = state
        .ctx
        .comment_backlog_tick()
        .await
        .map_err(|e| map_harvest_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: report,
        meta: ResponseMeta::new(req_id.0),
    }))
}

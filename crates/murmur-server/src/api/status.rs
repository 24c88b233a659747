use axum::{extract::State, Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use murmur_db::WorkQueue;

use crate::middleware::RequestId;

use super::{map_db_error, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Serialize)]
pub(super) struct CursorItem {
    pub source_key: String,
    pub min_id: String,
    pub max_id: String,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub(super) struct QueueItem {
    pub stage: String,
    pub depth: i64,
}

/// `GET /api/v1/cursors` — every source cursor with its version.
pub(super) async fn list_cursors(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Vec<CursorItem>>>, ApiError> {
    let rows = murmur_db::list_cursors(&state.ctx.pool)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let items = rows
        .into_iter()
        .map(|row| CursorItem {
            source_key: row.source_key,
            min_id: row.min_id,
            max_id: row.max_id,
            version: row.version,
            updated_at: row.updated_at,
        })
        .collect();

    Ok(Json(ApiResponse {
        data: items,
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// `GET /api/v1/queues` — depth of every known queue stage.
pub(super) async fn list_queues(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Vec<QueueItem>>>, ApiError> {
    let mut items = Vec::new();
    for stage in state.ctx.known_stages() {
        let depth = state
            .ctx
            .pool
            .len(&stage)
            .await
            .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
        items.push(QueueItem { stage, depth });
    }

    Ok(Json(ApiResponse {
        data: items,
        meta: ResponseMeta::new(req_id.0),
    }))
}

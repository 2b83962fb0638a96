//! System statistics endpoint

use axum::{Json, extract::State};

use crate::api::{error::ApiResult, state::ApiState, types::StatsResponse};

/// GET /api/v1/stats
///
/// Returns stored monitor count, running monitors and subscriber count
pub async fn get_stats(State(state): State<ApiState>) -> ApiResult<Json<StatsResponse>> {
    let snapshot = state.distributor.snapshot().await?;
    let monitors = state.storage.select_monitors().await?;

    Ok(Json(StatsResponse {
        timestamp: chrono::Utc::now().to_rfc3339(),
        monitors: monitors.len(),
        active_monitors: snapshot.monitors,
        subscribers: snapshot.subscribers.len(),
    }))
}

//! Monitor configuration and control endpoints
//!
//! Configuration changes go to storage first and are then mirrored to the
//! distributor, so a running poller always reflects the stored monitor.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{ActionResponse, MonitorAction},
};
use crate::monitor::Monitor;

async fn load(state: &ApiState, id: i64) -> ApiResult<Monitor> {
    state
        .storage
        .select_monitor(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("monitor {id} not found")))
}

/// GET /api/v1/monitors
pub async fn list_monitors(State(state): State<ApiState>) -> ApiResult<Json<Vec<Monitor>>> {
    Ok(Json(state.storage.select_monitors().await?))
}

/// GET /api/v1/monitors/:id
pub async fn get_monitor(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Monitor>> {
    Ok(Json(load(&state, id).await?))
}

/// POST /api/v1/monitors
///
/// Stores a new monitor and starts it if it is active
pub async fn create_monitor(
    State(state): State<ApiState>,
    Json(mut monitor): Json<Monitor>,
) -> ApiResult<(StatusCode, Json<Monitor>)> {
    if monitor.id.is_some() {
        return Err(ApiError::InvalidRequest(
            "new monitors must not carry an id".to_string(),
        ));
    }
    monitor.validate()?;

    let id = state.storage.insert_monitor(&monitor).await?;
    monitor.id = Some(id);
    info!("created monitor {id} ('{}')", monitor.name);

    if monitor.active {
        state.distributor.start(monitor.clone()).await?;
    }

    Ok((StatusCode::CREATED, Json(monitor)))
}

/// PUT /api/v1/monitors/:id
///
/// Replaces the configuration; a running poller is restarted with it
pub async fn update_monitor(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(mut monitor): Json<Monitor>,
) -> ApiResult<Json<Monitor>> {
    monitor.id = Some(id);
    monitor.validate()?;

    state.storage.update_monitor(&monitor).await?;

    state.distributor.stop(id).await?;
    if monitor.active {
        state.distributor.start(monitor.clone()).await?;
    }

    Ok(Json(monitor))
}

/// DELETE /api/v1/monitors/:id
pub async fn delete_monitor(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.distributor.stop(id).await?;
    state.storage.delete_monitor(id).await?;
    info!("deleted monitor {id}");

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/monitors/:id/start
///
/// Marks the monitor active and starts polling it
pub async fn start_monitor(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ActionResponse>> {
    let mut monitor = load(&state, id).await?;
    monitor.active = true;
    monitor.validate()?;

    state.storage.update_monitor(&monitor).await?;
    state.distributor.start(monitor).await?;

    Ok(Json(ActionResponse {
        id,
        action: MonitorAction::Started,
    }))
}

/// POST /api/v1/monitors/:id/stop
///
/// Marks the monitor inactive and stops polling it
pub async fn stop_monitor(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ActionResponse>> {
    let mut monitor = load(&state, id).await?;
    monitor.active = false;

    state.storage.update_monitor(&monitor).await?;
    state.distributor.stop(id).await?;

    Ok(Json(ActionResponse {
        id,
        action: MonitorAction::Stopped,
    }))
}

/// POST /api/v1/monitors/:id/poll
///
/// Polls right away; the measurement arrives on the stream
pub async fn poll_monitor(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<(StatusCode, Json<ActionResponse>)> {
    let monitor = load(&state, id).await?;
    state.distributor.poll_now(monitor).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ActionResponse {
            id,
            action: MonitorAction::Polled,
        }),
    ))
}

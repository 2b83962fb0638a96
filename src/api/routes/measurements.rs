//! Measurement history endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::MeasurementsQuery,
};
use crate::measurement::{Certificate, Measurement};

/// GET /api/v1/monitors/:id/measurements?limit=100
///
/// Most recent measurements of a monitor, newest first, without certificates
pub async fn list_measurements(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Query(query): Query<MeasurementsQuery>,
) -> ApiResult<Json<Vec<Measurement>>> {
    if state.storage.select_monitor(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("monitor {id} not found")));
    }

    let measurements = state
        .storage
        .select_measurements(id, query.limit())
        .await?;

    Ok(Json(measurements))
}

/// GET /api/v1/measurements/:id/certificates
pub async fn list_certificates(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<Certificate>>> {
    Ok(Json(state.storage.select_certificates(id).await?))
}

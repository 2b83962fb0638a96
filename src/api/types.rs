//! API request and response types

use serde::{Deserialize, Serialize};

/// Measurements returned when no limit is given
pub const DEFAULT_MEASUREMENT_LIMIT: usize = 100;

/// Upper bound for the `limit` query parameter
pub const MAX_MEASUREMENT_LIMIT: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub timestamp: String,

    /// Stored monitors
    pub monitors: usize,

    /// Ids of monitors currently being polled
    pub active_monitors: Vec<i64>,

    /// Connected stream subscribers
    pub subscribers: usize,
}

/// What a monitor action endpoint did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorAction {
    Started,
    Stopped,
    Polled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub id: i64,
    pub action: MonitorAction,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeasurementsQuery {
    pub limit: Option<usize>,
}

impl MeasurementsQuery {
    /// Requested limit, clamped to `1..=MAX_MEASUREMENT_LIMIT`
    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_MEASUREMENT_LIMIT)
            .clamp(1, MAX_MEASUREMENT_LIMIT)
    }
}

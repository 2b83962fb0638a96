//! REST API and WebSocket server for the monitoring hub
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Storage** for monitor configuration and measurement history
//! - **Distributor handle** for scheduling and stream subscriptions
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check (never requires a token)
//! - `GET /api/v1/stats` - Monitor and subscriber counts
//! - `GET|POST /api/v1/monitors` - List or create monitors
//! - `GET|PUT|DELETE /api/v1/monitors/:id` - Read, replace or delete a monitor
//! - `POST /api/v1/monitors/:id/start|stop|poll` - Control polling
//! - `GET /api/v1/monitors/:id/measurements` - Measurement history
//! - `GET /api/v1/measurements/:id/certificates` - Certificates of a measurement
//! - `WS /api/v1/stream` - Real-time measurement streaming

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod middleware;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;
#[cfg(feature = "api")]
pub mod websocket;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;
#[cfg(feature = "api")]
pub use types::{ActionResponse, HealthResponse, MonitorAction, StatsResponse};

#[cfg(feature = "api")]
use axum::{
    Router,
    routing::{get, post},
};
#[cfg(feature = "api")]
use std::net::SocketAddr;
#[cfg(feature = "api")]
use tracing::info;

#[cfg(feature = "api")]
use crate::config::ApiConfig;

/// Build the application router
#[cfg(feature = "api")]
pub fn router(state: ApiState, config: &ApiConfig) -> Router {
    use tower::ServiceBuilder;
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let mut api = Router::new()
        .route("/api/v1/stats", get(routes::stats::get_stats))
        .route(
            "/api/v1/monitors",
            get(routes::monitors::list_monitors).post(routes::monitors::create_monitor),
        )
        .route(
            "/api/v1/monitors/:id",
            get(routes::monitors::get_monitor)
                .put(routes::monitors::update_monitor)
                .delete(routes::monitors::delete_monitor),
        )
        .route(
            "/api/v1/monitors/:id/start",
            post(routes::monitors::start_monitor),
        )
        .route(
            "/api/v1/monitors/:id/stop",
            post(routes::monitors::stop_monitor),
        )
        .route(
            "/api/v1/monitors/:id/poll",
            post(routes::monitors::poll_monitor),
        )
        .route(
            "/api/v1/monitors/:id/measurements",
            get(routes::measurements::list_measurements),
        )
        .route(
            "/api/v1/measurements/:id/certificates",
            get(routes::measurements::list_certificates),
        )
        .route("/api/v1/stream", get(websocket::websocket_handler));

    // Add auth middleware if token provided
    if let Some(token) = &config.token {
        api = api.route_layer(axum::middleware::from_fn_with_state(
            token.clone(),
            middleware::auth::auth_middleware,
        ));
    }

    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .merge(api)
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    // Add CORS if enabled
    if config.cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(config: &ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind);

    let app = router(state, config);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}

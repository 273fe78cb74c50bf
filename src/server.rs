//! ==============================================================================
//! server.rs - dashboard and json api
//! ==============================================================================
//!
//! routes:
//!     GET  /        -> embedded dashboard page (polls /data every 3s)
//!     GET  /data    -> current reading + operating state
//!     POST /toggle  -> flip the enabled flag, returns {"active": bool}
//!     GET  /health  -> 200 while readings are fresh, 503 otherwise
//!
//! the server only ever sees SharedStatus: it never touches the serial port or
//! the session store, so a wedged sensor cannot stall a request.
//!
//! ==============================================================================

use crate::domain::{MoistureStatus, OperatingState, TemperatureStatus};
use crate::status::SharedStatus;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

/// a reading older than this makes /health report unhealthy
pub const HEALTH_MAX_AGE_SECS: f64 = 10.0;

const DASHBOARD: &str = include_str!("dashboard.html");

#[derive(Debug, Serialize)]
pub struct DataResponse {
    pub moisture: Option<f64>,
    pub temperature: Option<f64>,
    pub moisture_status: Option<MoistureStatus>,
    pub temp_status: Option<TemperatureStatus>,
    /// unix seconds
    pub timestamp: Option<f64>,
    pub status: OperatingState,
}

pub fn router(status: SharedStatus) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/data", get(data_handler))
        .route("/toggle", post(toggle_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(status)
}

pub async fn run_server(bind: &str, status: SharedStatus) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    tracing::info!("dashboard live at http://{}", bind);
    axum::serve(listener, router(status)).await?;
    Ok(())
}

async fn dashboard_handler() -> Html<&'static str> {
    Html(DASHBOARD)
}

async fn data_handler(State(status): State<SharedStatus>) -> Json<DataResponse> {
    let snap = status.snapshot().await;
    let reading = snap.last_reading.as_ref();
    Json(DataResponse {
        moisture: reading.map(|r| r.moisture),
        temperature: reading.map(|r| r.temperature),
        moisture_status: reading.map(|r| r.moisture_status),
        temp_status: reading.map(|r| r.temp_status),
        timestamp: reading.map(|r| unix_seconds(r.captured_at)),
        status: snap.state,
    })
}

async fn toggle_handler(State(status): State<SharedStatus>) -> Json<serde_json::Value> {
    let active = status.toggle().await;
    tracing::info!("sensor {}", if active { "activated" } else { "deactivated" });
    Json(json!({ "active": active }))
}

async fn health_handler(State(status): State<SharedStatus>) -> impl IntoResponse {
    let snap = status.snapshot().await;
    let last_reading = snap.last_reading.as_ref().map(|r| unix_seconds(r.captured_at));
    let now = unix_seconds(Utc::now());

    let healthy = snap.state == OperatingState::Active
        && last_reading.is_some_and(|at| now - at < HEALTH_MAX_AGE_SECS);

    let code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let body = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "sensor_active": snap.enabled,
        "last_reading": last_reading,
    });
    (code, Json(body))
}

fn unix_seconds(at: chrono::DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

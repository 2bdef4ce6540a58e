use crate::db::fetch_recent_readings;
use crate::errors::Error;
use crate::metrics::REJECTED_TOTAL;
use crate::model::{ReadingsResponse, SigfoxCallback};
use crate::pipeline::Pipeline;
use crate::registry::DeviceRegistry;
use crate::validate::validate;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 1000;

#[derive(Clone)]
struct IngestState {
    pipeline: Arc<Pipeline>,
}

#[derive(Clone)]
struct ReadingsState {
    pool: PgPool,
    registry: Arc<DeviceRegistry>,
}

#[derive(Debug, Deserialize)]
pub struct ReadingsQuery {
    limit: Option<usize>,
}

/// Receiver for backend callbacks.
pub fn ingest_router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/sigfox", post(sigfox_callback))
        .with_state(IngestState { pipeline })
}

pub fn readings_router(pool: PgPool, registry: Arc<DeviceRegistry>) -> Router {
    Router::new()
        .route(
            "/api/v1/devices/:device_id/readings",
            get(get_device_readings),
        )
        .with_state(ReadingsState { pool, registry })
}

fn reply(code: StatusCode, status: &str, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        code,
        Json(json!({ "status": status, "message": message.into() })),
    )
}

/// Takes the raw body so malformed callbacks still get the JSON error shape.
async fn sigfox_callback(
    State(state): State<IngestState>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let callback = match serde_json::from_slice::<SigfoxCallback>(&body) {
        Ok(callback) => callback,
        Err(e) => {
            REJECTED_TOTAL.inc();
            warn!("Rejected callback body: {}", e);
            return reply(
                StatusCode::BAD_REQUEST,
                "error",
                format!("Invalid callback: {}", e),
            );
        }
    };

    if let Err(e) = validate(&callback) {
        REJECTED_TOTAL.inc();
        warn!("Rejected callback: {}", e);
        return reply(StatusCode::BAD_REQUEST, "error", e.to_string());
    }

    match state.pipeline.ingest(callback.into_envelope(Utc::now())).await {
        Ok(entry) => {
            info!(
                device_id = %entry.device_id,
                sensor_group = %entry.sensor_group,
                sequence = ?entry.sequence,
                "Saved entry"
            );
            reply(StatusCode::OK, "success", "Data saved")
        }
        Err(e) => {
            error!("Processing error: {}", e);
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "error",
                format!("Processing error: {}", e),
            )
        }
    }
}

async fn get_device_readings(
    State(state): State<ReadingsState>,
    Path(device_id): Path<String>,
    Query(params): Query<ReadingsQuery>,
) -> Result<Json<ReadingsResponse>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let device_id = device_id.trim().to_lowercase();
    let group = state.registry.resolve(&device_id).group;

    let data = fetch_recent_readings(&state.pool, group, &device_id, limit)
        .await
        .map_err(|e: Error| AppError(anyhow::anyhow!("Database query failed: {}", e)))?;

    Ok(Json(ReadingsResponse {
        device_id,
        sensor_group: group,
        total: data.len(),
        data,
        limit,
    }))
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("API error: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal server error: {}", self.0),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

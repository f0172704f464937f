//! Health check.

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use chrono::{DateTime, Utc};
use medlearn_common::config::CacheBackend;
use serde::Serialize;
use tracing::warn;

use crate::middleware::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub database: &'static str,
    pub redis: &'static str,
    pub schema: &'static str,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Liveness plus dependency status. 503 when the database is unreachable.
async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let db_up = match state.db.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Health check: database unreachable");
            false
        }
    };

    let schema = if db_up {
        match state.schema_probe.is_ready(state.db.as_ref()).await {
            Ok(true) => "ready",
            Ok(false) => "missing",
            Err(e) => {
                warn!(error = %e, "Health check: schema probe failed");
                "missing"
            }
        }
    } else {
        "missing"
    };

    let redis = match &state.cache {
        None => "not_configured",
        Some(cache) if cache.backend() == CacheBackend::Memory => "memory",
        Some(cache) => match cache.ping().await {
            Ok(()) => "connected",
            Err(e) => {
                warn!(error = %e, "Health check: cache store unreachable");
                "error"
            }
        },
    };

    let status = if db_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthReport {
            status: if db_up { "ok" } else { "error" },
            database: if db_up { "connected" } else { "disconnected" },
            redis,
            schema,
            timestamp: Utc::now(),
            uptime_secs: state.started_at.elapsed().as_secs(),
        }),
    )
}

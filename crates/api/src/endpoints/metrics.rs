//! Metrics endpoints.

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use medlearn_common::MetricsSnapshot;
use serde::Serialize;

use crate::middleware::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(metrics_json))
        .route("/prometheus", get(metrics_prometheus))
}

/// JSON metrics, grouped by concern.
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub http: HttpMetrics,
    pub cache: CacheMetrics,
    pub access: AccessMetrics,
    pub learning: LearningMetrics,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpMetrics {
    pub requests_total: u64,
    pub requests_active: u64,
    pub requests_2xx: u64,
    pub requests_4xx: u64,
    pub requests_5xx: u64,
    pub latency_avg_us: u64,
    pub rate_limited: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub writes: u64,
    pub errors: u64,
    pub invalidated_keys: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessMetrics {
    pub bans_issued: u64,
    pub bans_lifted: u64,
    pub bans_expired: u64,
    pub logins_succeeded: u64,
    pub logins_failed: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningMetrics {
    pub quiz_attempts: u64,
}

impl From<MetricsSnapshot> for MetricsResponse {
    fn from(s: MetricsSnapshot) -> Self {
        Self {
            http: HttpMetrics {
                requests_total: s.http_requests_total,
                requests_active: s.http_requests_active,
                requests_2xx: s.http_requests_2xx,
                requests_4xx: s.http_requests_4xx,
                requests_5xx: s.http_requests_5xx,
                latency_avg_us: s.http_request_latency_avg_us,
                rate_limited: s.http_rate_limited,
            },
            cache: CacheMetrics {
                hits: s.cache_hits,
                misses: s.cache_misses,
                hit_rate: s.cache_hit_rate,
                writes: s.cache_writes,
                errors: s.cache_errors,
                invalidated_keys: s.cache_invalidated_keys,
            },
            access: AccessMetrics {
                bans_issued: s.bans_issued,
                bans_lifted: s.bans_lifted,
                bans_expired: s.bans_expired,
                logins_succeeded: s.logins_succeeded,
                logins_failed: s.logins_failed,
            },
            learning: LearningMetrics {
                quiz_attempts: s.quiz_attempts,
            },
        }
    }
}

async fn metrics_json(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse::from(state.metrics.snapshot()))
}

async fn metrics_prometheus(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.to_prometheus(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use medlearn_common::Metrics;
    use std::time::Duration;

    #[test]
    fn test_response_groups_snapshot() {
        let metrics = Metrics::new();
        metrics.record_http_request(200, Duration::from_millis(4));
        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(false);
        metrics.record_ban_issued();
        metrics.record_quiz_attempt();

        let response = MetricsResponse::from(metrics.snapshot());

        assert_eq!(response.http.requests_total, 1);
        assert_eq!(response.http.requests_2xx, 1);
        assert_eq!(response.cache.hit_rate, 0.5);
        assert_eq!(response.access.bans_issued, 1);
        assert_eq!(response.learning.quiz_attempts, 1);
    }

    #[test]
    fn test_zero_snapshot() {
        let response = MetricsResponse::from(Metrics::new().snapshot());
        assert_eq!(response.http.latency_avg_us, 0);
        assert_eq!(response.cache.hit_rate, 0.0);
    }
}

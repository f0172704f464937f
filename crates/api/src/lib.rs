//! HTTP API layer for medlearn.
//!
//! - **Endpoints**: auth, quizzes, resources, subscriptions, stats, profile and admin
//! - **Extractors**: identity resolved by the auth middleware
//! - **Middleware**: request metrics, rate limiting, authentication
//! - **Cache**: per-route response caching and invalidation
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod cache;
pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod rate_limit;
pub mod response;

use axum::{Router, middleware::from_fn_with_state};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub use endpoints::router;
pub use middleware::AppState;
pub use rate_limit::{ApiRateLimiter, RateLimitConfig, RateLimiterState};

/// Build the full application router.
///
/// Request path through the global stack: metrics, API rate limit, auth,
/// then the per-route cache and invalidation layers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", endpoints::router(&state))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .layer(from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit::rate_limit_api,
        ))
        .layer(from_fn_with_state(
            state.metrics.clone(),
            middleware::track_requests,
        ))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

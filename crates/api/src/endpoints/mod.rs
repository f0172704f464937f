//! API endpoints.
//!
//! Each module exposes `router(&AppState)`; the state is needed up front to
//! build the per-route cache, invalidation and rate limit layers.

mod admin;
mod auth;
mod health;
mod metrics;
mod quizzes;
mod resources;
mod stats;
mod subscriptions;
mod user;

use axum::Router;

use crate::middleware::AppState;

/// Create the API router. Mounted under `/api`.
pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/metrics", metrics::router())
        .nest("/auth", auth::router(state))
        .nest("/tests", quizzes::router(state))
        .nest("/resources", resources::router(state))
        .nest("/subscriptions", subscriptions::router(state))
        .nest("/stats", stats::router(state))
        .nest("/user", user::router(state))
        .nest("/admin", admin::router(state))
}

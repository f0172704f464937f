//! Learning statistics and achievements.

use axum::{
    Router,
    extract::State,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use medlearn_common::AppResult;
use medlearn_core::{AchievementView, TestingStats};
use medlearn_db::entities::achievement;
use serde::Serialize;

use crate::{
    cache::{CachePolicy, families, invalidate_cache, response_cache},
    extractors::AuthUser,
    middleware::AppState,
    response::ApiResponse,
};

pub fn router(state: &AppState) -> Router<AppState> {
    let per_user = || from_fn_with_state(state.cached(CachePolicy::USER), response_cache);

    Router::new()
        .route("/testing", get(testing).layer(per_user()))
        .route("/achievements", get(achievements).layer(per_user()))
        .route(
            "/check-achievements",
            post(check_achievements).layer(from_fn_with_state(
                state.invalidates(families::USERS),
                invalidate_cache,
            )),
        )
}

async fn testing(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<TestingStats>> {
    Ok(ApiResponse::ok(state.stats_service.testing(&user.id).await?))
}

async fn achievements(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<AchievementView>>> {
    Ok(ApiResponse::ok(
        state.stats_service.achievements(&user.id).await?,
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewAchievements {
    new_achievements: Vec<achievement::Model>,
}

async fn check_achievements(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<NewAchievements>> {
    Ok(ApiResponse::ok(NewAchievements {
        new_achievements: state.stats_service.check_achievements(&user.id).await?,
    }))
}

//! Self-service account endpoints.

use axum::{
    Json, Router,
    extract::{Query, State},
    middleware::from_fn_with_state,
    routing::{delete, get, put},
};
use medlearn_common::AppResult;
use medlearn_core::{
    ActivityPage, ChangePasswordInput, Profile, SubjectProgress, UpdateProfileInput,
    UpdateSettingsInput, UserStats,
};
use serde::Deserialize;

use crate::{
    cache::{CachePolicy, families, invalidate_cache, response_cache},
    extractors::AuthUser,
    middleware::AppState,
    response::{ApiResponse, message},
};

const DEFAULT_ACTIVITY_LIMIT: u64 = 10;
const MAX_ACTIVITY_LIMIT: u64 = 100;

pub fn router(state: &AppState) -> Router<AppState> {
    let per_user = || from_fn_with_state(state.cached(CachePolicy::USER), response_cache);
    let touches_user = || from_fn_with_state(state.invalidates(families::USERS), invalidate_cache);

    Router::new()
        .route(
            "/profile",
            get(profile)
                .layer(per_user())
                .merge(put(update_profile).layer(touches_user())),
        )
        .route("/settings", put(update_settings).layer(touches_user()))
        .route("/password", put(change_password).layer(touches_user()))
        .route("/stats", get(stats).layer(per_user()))
        .route("/activity", get(activity).layer(per_user()))
        .route("/progress", get(progress).layer(per_user()))
        .route("/account", delete(delete_account).layer(touches_user()))
}

async fn profile(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Profile>> {
    Ok(ApiResponse::ok(state.user_service.profile(&user.id).await?))
}

async fn update_profile(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(input): Json<UpdateProfileInput>,
) -> AppResult<ApiResponse<Profile>> {
    Ok(ApiResponse::ok(
        state.user_service.update_profile(&user.id, input).await?,
    ))
}

async fn update_settings(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(input): Json<UpdateSettingsInput>,
) -> AppResult<ApiResponse<Profile>> {
    Ok(ApiResponse::ok(
        state.user_service.update_settings(&user.id, input).await?,
    ))
}

async fn change_password(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(input): Json<ChangePasswordInput>,
) -> AppResult<ApiResponse<serde_json::Value>> {
    state.user_service.change_password(&user.id, input).await?;
    Ok(message("Password changed successfully"))
}

async fn stats(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<UserStats>> {
    Ok(ApiResponse::ok(state.stats_service.user_stats(&user.id).await?))
}

#[derive(Deserialize)]
struct Paging {
    limit: Option<u64>,
    offset: Option<u64>,
}

async fn activity(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Query(paging): Query<Paging>,
) -> AppResult<ApiResponse<ActivityPage>> {
    let limit = paging
        .limit
        .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
        .clamp(1, MAX_ACTIVITY_LIMIT);
    Ok(ApiResponse::ok(
        state
            .stats_service
            .activity(&user.id, limit, paging.offset.unwrap_or(0))
            .await?,
    ))
}

async fn progress(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<SubjectProgress>>> {
    Ok(ApiResponse::ok(state.stats_service.progress(&user.id).await?))
}

async fn delete_account(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<serde_json::Value>> {
    state.user_service.delete_account(&user.id).await?;
    Ok(message("Account deleted"))
}

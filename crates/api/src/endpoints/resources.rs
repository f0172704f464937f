//! Study resource endpoints.

use axum::{
    Router,
    extract::{Path, Query, State},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use medlearn_common::AppResult;
use medlearn_core::{ResourceStats, ResourceView};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    cache::{CachePolicy, VaryBy, families, invalidate_cache, response_cache},
    extractors::{AuthUser, MaybeAuthUser},
    middleware::AppState,
    response::ApiResponse,
};

/// Premium bodies depend on the reader, so public lists vary by user.
const PER_READER: CachePolicy = CachePolicy::LIST.vary(&[VaryBy::UserId]);

pub fn router(state: &AppState) -> Router<AppState> {
    let per_reader = || from_fn_with_state(state.cached(PER_READER), response_cache);
    let per_user = || from_fn_with_state(state.cached(CachePolicy::USER), response_cache);
    let touches_favorites =
        || from_fn_with_state(state.invalidates(families::MEMBERSHIP), invalidate_cache);

    Router::new()
        .route("/", get(list).layer(per_reader()))
        .route("/stats", get(stats).layer(per_reader()))
        .route("/type/{resource_type}", get(by_type))
        .route("/search", get(search))
        .route("/subject/{subject_id}", get(by_subject))
        .route("/view/{id}", post(record_view))
        .route("/favorites", get(favorites).layer(per_user()))
        .route("/favorite/check/{id}", get(is_favorite).layer(per_user()))
        .route(
            "/favorite/{id}",
            post(add_favorite)
                .delete(remove_favorite)
                .layer(touches_favorites()),
        )
}

async fn list(
    MaybeAuthUser(reader): MaybeAuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<ResourceView>>> {
    Ok(ApiResponse::ok(
        state.resource_service.list(reader.as_ref()).await?,
    ))
}

async fn stats(
    MaybeAuthUser(reader): MaybeAuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<ResourceStats>> {
    Ok(ApiResponse::ok(
        state.resource_service.stats(reader.as_ref()).await?,
    ))
}

async fn by_type(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
) -> AppResult<ApiResponse<Vec<ResourceView>>> {
    Ok(ApiResponse::ok(
        state.resource_service.by_type(&resource_type, &user).await?,
    ))
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    query: String,
}

async fn search(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> AppResult<ApiResponse<Vec<ResourceView>>> {
    Ok(ApiResponse::ok(
        state.resource_service.search(&q.query, &user).await?,
    ))
}

async fn by_subject(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> AppResult<ApiResponse<Vec<ResourceView>>> {
    Ok(ApiResponse::ok(
        state.resource_service.by_subject(&subject_id, &user).await?,
    ))
}

async fn record_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<serde_json::Value>> {
    state.resource_service.record_view(&id).await?;
    Ok(ApiResponse::ok(json!({ "recorded": true })))
}

async fn favorites(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<ResourceView>>> {
    Ok(ApiResponse::ok(state.resource_service.favorites(&user).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FavoriteState {
    is_favorite: bool,
}

async fn is_favorite(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<FavoriteState>> {
    Ok(ApiResponse::ok(FavoriteState {
        is_favorite: state.resource_service.is_favorite(&user.id, &id).await?,
    }))
}

async fn add_favorite(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<FavoriteState>> {
    state.resource_service.add_favorite(&user.id, &id).await?;
    Ok(ApiResponse::ok(FavoriteState { is_favorite: true }))
}

async fn remove_favorite(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<FavoriteState>> {
    state.resource_service.remove_favorite(&user.id, &id).await?;
    Ok(ApiResponse::ok(FavoriteState { is_favorite: false }))
}

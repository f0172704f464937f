//! Admin endpoints: content management, moderation and user management.
//!
//! Every handler names the capability it needs; [`require`] decides.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
};
use medlearn_common::AppResult;
use medlearn_core::{
    ActivityEntry, AdminUserView, BanInput, Capability, CategoryWithSubject,
    CreateCategoryInput, CreateResourceInput, CreateSubcategoryInput, CreateSubjectInput,
    CreateTestInput, DashboardStats, QuestionDetails, SavedTest, SetPremiumInput, SetRoleInput,
    TestDetails, TestListItem, UserPage, UsersStats, require,
};
use medlearn_db::entities::{category, resource, subcategory, subject, user_ban};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    cache::{CachePolicy, families, invalidate_cache, is_staff, response_cache},
    extractors::AuthUser,
    middleware::AppState,
    response::{ApiResponse, Created, message},
};

pub fn router(state: &AppState) -> Router<AppState> {
    let tree = || from_fn_with_state(state.invalidates(families::CONTENT_TREE), invalidate_cache);
    let tests = || from_fn_with_state(state.invalidates(families::TESTS), invalidate_cache);
    let resources = || from_fn_with_state(state.invalidates(families::RESOURCES), invalidate_cache);
    let staff_detail = || {
        from_fn_with_state(
            state.cached(CachePolicy::DETAIL.when(is_staff)),
            response_cache,
        )
    };
    let membership =
        || from_fn_with_state(state.invalidates(families::MEMBERSHIP), invalidate_cache);

    Router::new()
        // Content
        .route("/subjects", post(create_subject).layer(tree()))
        .route(
            "/categories",
            get(list_categories).merge(post(create_category).layer(tree())),
        )
        .route("/subcategories", post(create_subcategory).layer(tree()))
        .route("/resources", post(create_resource).layer(resources()))
        .route("/resources/{id}", delete(delete_resource).layer(resources()))
        .route(
            "/tests",
            get(list_tests)
                .layer(from_fn_with_state(
                    state.cached(CachePolicy::LIST.when(is_staff)),
                    response_cache,
                ))
                .merge(post(create_test).layer(tests())),
        )
        .route(
            "/tests/{id}",
            get(test_details)
                .layer(staff_detail())
                .merge(put(update_test).delete(delete_test).layer(tests())),
        )
        .route("/tests/{id}/questions", get(test_questions).layer(staff_detail()))
        // Users
        .route("/users", get(list_users))
        .route("/users/stats", get(users_stats))
        .route("/users/{id}", delete(delete_user).layer(membership()))
        .route("/users/{id}/ban", post(ban_user).layer(membership()))
        .route("/users/{id}/unban", post(unban_user).layer(membership()))
        .route("/users/{id}/bans", get(ban_history))
        .route("/users/{id}/premium", post(set_premium).layer(membership()))
        .route("/users/{id}/role", post(set_role).layer(membership()))
        // Platform
        .route("/stats", get(dashboard))
        .route("/activity", get(activity))
        .route("/cache/invalidate", post(invalidate))
}

// ==================== Content ====================

async fn create_subject(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(input): Json<CreateSubjectInput>,
) -> AppResult<Created<subject::Model>> {
    require(&user, Capability::ManageContent)?;
    Ok(Created(state.content_service.create_subject(input).await?))
}

async fn create_category(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(input): Json<CreateCategoryInput>,
) -> AppResult<Created<category::Model>> {
    require(&user, Capability::ManageContent)?;
    Ok(Created(state.content_service.create_category(input).await?))
}

async fn list_categories(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<CategoryWithSubject>>> {
    require(&user, Capability::ManageContent)?;
    Ok(ApiResponse::ok(state.content_service.all_categories().await?))
}

async fn create_subcategory(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(input): Json<CreateSubcategoryInput>,
) -> AppResult<Created<subcategory::Model>> {
    require(&user, Capability::ManageContent)?;
    Ok(Created(state.content_service.create_subcategory(input).await?))
}

async fn create_resource(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(input): Json<CreateResourceInput>,
) -> AppResult<Created<resource::Model>> {
    require(&user, Capability::ManageContent)?;
    Ok(Created(state.resource_service.create(input).await?))
}

async fn delete_resource(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<serde_json::Value>> {
    require(&user, Capability::ManageContent)?;
    state.resource_service.delete(&id).await?;
    Ok(message("Resource deleted"))
}

async fn list_tests(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<TestListItem>>> {
    require(&user, Capability::ManageContent)?;
    Ok(ApiResponse::ok(state.quiz_service.list_all().await?))
}

async fn create_test(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(input): Json<CreateTestInput>,
) -> AppResult<Created<SavedTest>> {
    require(&user, Capability::ManageContent)?;
    Ok(Created(state.quiz_service.create_test(&user.id, input).await?))
}

async fn test_details(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<TestDetails>> {
    require(&user, Capability::ManageContent)?;
    Ok(ApiResponse::ok(state.quiz_service.details(&id).await?))
}

async fn test_questions(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Vec<QuestionDetails>>> {
    require(&user, Capability::ManageContent)?;
    Ok(ApiResponse::ok(state.quiz_service.questions(&id).await?))
}

#[derive(Serialize)]
struct Updated {
    message: &'static str,
    #[serde(flatten)]
    test: SavedTest,
}

async fn update_test(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<CreateTestInput>,
) -> AppResult<ApiResponse<Updated>> {
    require(&user, Capability::ManageContent)?;
    let test = state.quiz_service.update_test(&id, input).await?;
    Ok(ApiResponse::ok(Updated {
        message: "Test updated",
        test,
    }))
}

async fn delete_test(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<serde_json::Value>> {
    require(&user, Capability::ManageContent)?;
    state.quiz_service.delete_test(&id).await?;
    Ok(message("Test deleted"))
}

// ==================== Moderation ====================

#[derive(Deserialize)]
struct UserListQuery {
    page: Option<u64>,
    limit: Option<u64>,
    search: Option<String>,
}

async fn list_users(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Query(q): Query<UserListQuery>,
) -> AppResult<ApiResponse<UserPage>> {
    require(&user, Capability::ModerateUsers)?;
    let search = q.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    Ok(ApiResponse::ok(
        state
            .admin_service
            .list_users(q.page.unwrap_or(1), q.limit.unwrap_or(20), search)
            .await?,
    ))
}

#[derive(Serialize)]
struct Moderated {
    message: &'static str,
    user: AdminUserView,
}

async fn ban_user(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<BanInput>,
) -> AppResult<ApiResponse<Moderated>> {
    require(&actor, Capability::ModerateUsers)?;
    let user = state.ban_service.ban(&actor.id, &id, input).await?;
    Ok(ApiResponse::ok(Moderated {
        message: "User banned successfully",
        user: user.into(),
    }))
}

#[derive(Deserialize, Validate, Default)]
struct UnbanRequest {
    #[validate(length(max = 1000))]
    reason: Option<String>,
}

async fn unban_user(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<UnbanRequest>>,
) -> AppResult<ApiResponse<Moderated>> {
    require(&actor, Capability::ModerateUsers)?;
    let req = body.map(|Json(r)| r).unwrap_or_default();
    req.validate()?;

    let user = state
        .ban_service
        .unban(&actor.id, &id, req.reason.as_deref())
        .await?;
    Ok(ApiResponse::ok(Moderated {
        message: "User unbanned successfully",
        user: user.into(),
    }))
}

async fn ban_history(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Vec<user_ban::Model>>> {
    require(&actor, Capability::ModerateUsers)?;
    Ok(ApiResponse::ok(state.ban_service.history(&id).await?))
}

// ==================== User management ====================

async fn set_premium(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<SetPremiumInput>,
) -> AppResult<ApiResponse<AdminUserView>> {
    require(&actor, Capability::ManageUsers)?;
    Ok(ApiResponse::ok(
        state.admin_service.set_premium(&id, input).await?,
    ))
}

async fn set_role(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<SetRoleInput>,
) -> AppResult<ApiResponse<AdminUserView>> {
    require(&actor, Capability::ManageUsers)?;
    Ok(ApiResponse::ok(
        state.admin_service.set_role(&actor, &id, input).await?,
    ))
}

async fn delete_user(
    AuthUser(actor): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<serde_json::Value>> {
    require(&actor, Capability::ManageUsers)?;
    state.admin_service.delete_user(&actor, &id).await?;
    Ok(message("User deleted"))
}

// ==================== Platform ====================

async fn users_stats(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<UsersStats>> {
    require(&user, Capability::ViewAdminStats)?;
    Ok(ApiResponse::ok(state.admin_service.users_stats().await?))
}

async fn dashboard(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<DashboardStats>> {
    require(&user, Capability::ViewAdminStats)?;
    Ok(ApiResponse::ok(state.admin_service.dashboard().await?))
}

#[derive(Deserialize)]
struct ActivityQuery {
    limit: Option<u64>,
    offset: Option<u64>,
}

async fn activity(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Query(q): Query<ActivityQuery>,
) -> AppResult<ApiResponse<Vec<ActivityEntry>>> {
    require(&user, Capability::ViewAdminStats)?;
    Ok(ApiResponse::ok(
        state
            .admin_service
            .activity(q.limit.unwrap_or(20), q.offset.unwrap_or(0))
            .await?,
    ))
}

#[derive(Deserialize, Validate)]
struct InvalidateRequest {
    #[validate(length(min = 1, max = 50))]
    patterns: Vec<String>,
}

#[derive(Serialize)]
struct Invalidated {
    deleted: u64,
}

/// Manual invalidation. Waits for the deletes, unlike the route middleware.
async fn invalidate(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> AppResult<ApiResponse<Invalidated>> {
    require(&user, Capability::ManageCache)?;
    req.validate()?;

    let deleted = match &state.cache {
        Some(cache) => {
            let patterns: Vec<&str> = req.patterns.iter().map(String::as_str).collect();
            let deleted = cache.invalidate(&patterns).await;
            state.metrics.record_cache_invalidation(deleted);
            deleted
        }
        None => 0,
    };
    tracing::info!(actor_id = %user.id, deleted, "Manual cache invalidation");
    Ok(ApiResponse::ok(Invalidated { deleted }))
}

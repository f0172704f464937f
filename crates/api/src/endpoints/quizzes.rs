//! Quiz endpoints: the content tree, taking tests and managing them.

use axum::{
    Json, Router,
    extract::{Path, State},
    middleware::from_fn_with_state,
    routing::{delete, get, post},
};
use medlearn_common::AppResult;
use medlearn_core::{
    Capability, CreateTestInput, SavedTest, FinishInput, QuizResult, QuizView, TestDetails,
    TestListItem, require,
};
use medlearn_db::entities::{category, subcategory, subject, test};

use crate::{
    cache::{CachePolicy, families, invalidate_cache, is_staff, response_cache},
    extractors::AuthUser,
    middleware::AppState,
    rate_limit::rate_limit_quiz,
    response::{ApiResponse, Created},
};

pub fn router(state: &AppState) -> Router<AppState> {
    let list = || from_fn_with_state(state.cached(CachePolicy::LIST), response_cache);
    let quiz_limit = || from_fn_with_state(state.rate_limiter.clone(), rate_limit_quiz);

    Router::new()
        .route("/subjects", get(subjects).layer(list()))
        .route("/categories/{subject_id}", get(categories).layer(list()))
        .route("/subcategories/{category_id}", get(subcategories).layer(list()))
        .route("/subject/{subject_id}", get(tests_for_subject).layer(list()))
        .route("/start-by-id/{test_id}", get(start_by_id).layer(quiz_limit()))
        .route("/start-by-subject/{subject_id}", get(start_by_subject).layer(quiz_limit()))
        .route("/start/{subcategory_id}", get(start_by_subcategory).layer(quiz_limit()))
        .route(
            "/finish",
            post(finish)
                .layer(from_fn_with_state(state.invalidates(families::USERS), invalidate_cache))
                .layer(quiz_limit()),
        )
        .route(
            "/create",
            post(create).layer(from_fn_with_state(state.invalidates(families::TESTS), invalidate_cache)),
        )
        .route("/all", get(list_all))
        .route(
            "/details/{id}",
            get(details).layer(from_fn_with_state(
                state.cached(CachePolicy::DETAIL.when(is_staff)),
                response_cache,
            )),
        )
        .route(
            "/{id}",
            delete(remove).layer(from_fn_with_state(state.invalidates(families::TESTS), invalidate_cache)),
        )
}

async fn subjects(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<subject::Model>>> {
    Ok(ApiResponse::ok(state.content_service.subjects().await?))
}

async fn categories(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> AppResult<ApiResponse<Vec<category::Model>>> {
    Ok(ApiResponse::ok(
        state.content_service.categories(&subject_id).await?,
    ))
}

async fn subcategories(
    State(state): State<AppState>,
    Path(category_id): Path<String>,
) -> AppResult<ApiResponse<Vec<subcategory::Model>>> {
    Ok(ApiResponse::ok(
        state.content_service.subcategories(&category_id).await?,
    ))
}

async fn tests_for_subject(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> AppResult<ApiResponse<Vec<test::Model>>> {
    Ok(ApiResponse::ok(
        state.quiz_service.tests_for_subject(&subject_id).await?,
    ))
}

async fn start_by_id(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> AppResult<ApiResponse<QuizView>> {
    require(&user, Capability::TakeQuizzes)?;
    Ok(ApiResponse::ok(state.quiz_service.start_by_id(&test_id).await?))
}

async fn start_by_subject(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> AppResult<ApiResponse<QuizView>> {
    require(&user, Capability::TakeQuizzes)?;
    Ok(ApiResponse::ok(
        state.quiz_service.start_by_subject(&subject_id).await?,
    ))
}

async fn start_by_subcategory(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(subcategory_id): Path<String>,
) -> AppResult<ApiResponse<QuizView>> {
    require(&user, Capability::TakeQuizzes)?;
    Ok(ApiResponse::ok(
        state.quiz_service.start_by_subcategory(&subcategory_id).await?,
    ))
}

async fn finish(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(input): Json<FinishInput>,
) -> AppResult<ApiResponse<QuizResult>> {
    require(&user, Capability::TakeQuizzes)?;
    Ok(ApiResponse::ok(state.quiz_service.finish(&user.id, input).await?))
}

async fn create(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(input): Json<CreateTestInput>,
) -> AppResult<Created<SavedTest>> {
    require(&user, Capability::ManageContent)?;
    Ok(Created(state.quiz_service.create_test(&user.id, input).await?))
}

async fn list_all(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<TestListItem>>> {
    require(&user, Capability::ManageContent)?;
    Ok(ApiResponse::ok(state.quiz_service.list_all().await?))
}

async fn details(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<TestDetails>> {
    require(&user, Capability::ManageContent)?;
    Ok(ApiResponse::ok(state.quiz_service.details(&id).await?))
}

async fn remove(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<serde_json::Value>> {
    require(&user, Capability::ManageContent)?;
    state.quiz_service.delete_test(&id).await?;
    Ok(crate::response::message("Test deleted"))
}

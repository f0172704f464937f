//! API integration tests.
//!
//! These drive the full router (global middleware included) over a mock
//! database and an in-memory response cache.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::redundant_clone)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use chrono::Utc;
use medlearn_api::{AppState, app};
use medlearn_common::{
    CacheError, CachedResponse, Config, Metrics, ResponseCache, ResponseCacheStore,
    config::{CacheBackend, RateLimitSettings},
};
use medlearn_db::{
    entities::{resource, subject, user::Role, user_ban},
    test_utils::fixtures,
};
use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase, MockExecResult, Value};
use serde_json::Value as Json;
use tower::ServiceExt;

fn state_with(db: DatabaseConnection, config: &Config, cache: Option<ResponseCache>) -> AppState {
    AppState::new(Arc::new(db), config, cache, Arc::new(Metrics::new()))
}

fn test_state(db: DatabaseConnection) -> AppState {
    state_with(db, &Config::for_tests(), Some(ResponseCache::in_memory()))
}

fn token_for(state: &AppState, user_id: &str) -> String {
    state
        .auth_service
        .jwt()
        .issue_access_token(user_id, &format!("{user_id}@example.com"))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn authed(method: &str, uri: &str, token: &str, body: Option<Json>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"));
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(router: &Router, req: Request<Body>) -> Response {
    router.clone().oneshot(req).await.unwrap()
}

fn x_cache(response: &Response) -> &str {
    response
        .headers()
        .get("x-cache")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

async fn json_body(response: Response) -> Json {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Give spawned cache writes and invalidations a chance to run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn count_row(n: i64) -> BTreeMap<&'static str, Value> {
    BTreeMap::from([("num_items", Value::BigInt(Some(n)))])
}

fn subjects() -> Vec<subject::Model> {
    vec![
        fixtures::subject("s1", "Anatomy"),
        fixtures::subject("s2", "Physiology"),
    ]
}

#[tokio::test]
async fn test_list_is_cached_until_content_changes() {
    let admin = fixtures::user_with_role("admin1", Role::Admin);
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        // first GET
        .append_query_results([subjects()])
        // POST /admin/subjects: auth lookup, ban lookup, name check, insert
        .append_query_results([vec![admin.clone()]])
        .append_query_results([Vec::<user_ban::Model>::new()])
        .append_query_results([vec![count_row(0)]])
        .append_query_results([vec![fixtures::subject("s3", "Pharmacology")]])
        // GET after invalidation
        .append_query_results([subjects()])
        .into_connection();
    let state = test_state(db);
    let token = token_for(&state, &admin.id);
    let router = app(state);

    let first = send(&router, get("/api/tests/subjects")).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(x_cache(&first), "MISS");
    let first_body = json_body(first).await;
    settle().await;

    let second = send(&router, get("/api/tests/subjects")).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(x_cache(&second), "HIT");
    assert_eq!(
        second
            .headers()
            .get("x-cache-key")
            .and_then(|v| v.to_str().ok()),
        Some("api:GET:/api/tests/subjects")
    );
    assert_eq!(json_body(second).await, first_body);

    let created = send(
        &router,
        authed(
            "POST",
            "/api/admin/subjects",
            &token,
            Some(serde_json::json!({ "name": "Pharmacology" })),
        ),
    )
    .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    settle().await;

    let third = send(&router, get("/api/tests/subjects")).await;
    assert_eq!(third.status(), StatusCode::OK);
    assert_eq!(x_cache(&third), "MISS");
}

#[tokio::test]
async fn test_creating_a_test_invalidates_test_lists() {
    let admin = fixtures::user_with_role("admin1", Role::Admin);
    let inserted = MockExecResult {
        last_insert_id: 0,
        rows_affected: 1,
    };
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([subjects()])
        // POST /admin/tests: auth lookup, ban lookup, subject check, test insert
        .append_query_results([vec![admin.clone()]])
        .append_query_results([Vec::<user_ban::Model>::new()])
        .append_query_results([vec![fixtures::subject("s1", "Anatomy")]])
        .append_query_results([vec![fixtures::test("t1", "s1")]])
        .append_query_results([subjects()])
        // question and answer batches
        .append_exec_results([inserted.clone(), inserted])
        .into_connection();
    let state = test_state(db);
    let token = token_for(&state, &admin.id);
    let router = app(state);

    assert_eq!(x_cache(&send(&router, get("/api/tests/subjects")).await), "MISS");
    settle().await;
    assert_eq!(x_cache(&send(&router, get("/api/tests/subjects")).await), "HIT");

    let body = serde_json::json!({
        "subjectId": "s1",
        "title": "Bones",
        "questions": [{
            "text": "Longest bone?",
            "answers": [
                { "text": "Femur", "isCorrect": true },
                { "text": "Tibia" }
            ]
        }]
    });
    let created = send(&router, authed("POST", "/api/admin/tests", &token, Some(body))).await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = json_body(created).await;
    assert_eq!(created["data"]["questionsCount"], 1);
    settle().await;

    assert_eq!(x_cache(&send(&router, get("/api/tests/subjects")).await), "MISS");
}

#[tokio::test]
async fn test_editing_a_test_invalidates_its_details() {
    let admin = fixtures::user_with_role("admin1", Role::Admin);
    let no_bans = Vec::<user_ban::Model>::new;
    let exec = |rows| MockExecResult {
        last_insert_id: 0,
        rows_affected: rows,
    };
    let question = || vec![fixtures::question("q1", "t1", 0)];
    let answers = || {
        vec![
            fixtures::answer("a1", "q1", true),
            fixtures::answer("a2", "q1", false),
        ]
    };
    let mut revised = fixtures::test("t1", "s1");
    revised.title = "Bones, revised".to_string();

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        // first GET
        .append_query_results([vec![admin.clone()]])
        .append_query_results([no_bans()])
        .append_query_results([vec![fixtures::test("t1", "s1")]])
        .append_query_results([question()])
        .append_query_results([answers()])
        // cached GET
        .append_query_results([vec![admin.clone()]])
        .append_query_results([no_bans()])
        // PUT: lookup, subject check, update
        .append_query_results([vec![admin.clone()]])
        .append_query_results([no_bans()])
        .append_query_results([vec![fixtures::test("t1", "s1")]])
        .append_query_results([vec![fixtures::subject("s1", "Anatomy")]])
        .append_query_results([vec![revised.clone()]])
        .append_exec_results([exec(2), exec(1), exec(1), exec(2)])
        // GET after invalidation
        .append_query_results([vec![admin.clone()]])
        .append_query_results([no_bans()])
        .append_query_results([vec![revised]])
        .append_query_results([question()])
        .append_query_results([answers()])
        .into_connection();
    let state = test_state(db);
    let token = token_for(&state, &admin.id);
    let router = app(state);

    let first = send(&router, authed("GET", "/api/admin/tests/t1", &token, None)).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(x_cache(&first), "MISS");
    settle().await;
    let cached = send(&router, authed("GET", "/api/admin/tests/t1", &token, None)).await;
    assert_eq!(x_cache(&cached), "HIT");

    let body = serde_json::json!({
        "subjectId": "s1",
        "title": "Bones, revised",
        "questions": [{
            "text": "Longest bone?",
            "answers": [
                { "text": "Femur", "isCorrect": true },
                { "text": "Tibia" }
            ]
        }]
    });
    let updated = send(&router, authed("PUT", "/api/admin/tests/t1", &token, Some(body))).await;
    assert_eq!(updated.status(), StatusCode::OK);
    let updated = json_body(updated).await;
    assert_eq!(updated["data"]["testId"], "t1");
    assert_eq!(updated["data"]["questionsCount"], 1);
    settle().await;

    let after = send(&router, authed("GET", "/api/admin/tests/t1", &token, None)).await;
    assert_eq!(x_cache(&after), "MISS");
    assert_eq!(json_body(after).await["data"]["title"], "Bones, revised");
}

#[tokio::test]
async fn test_favorite_toggle_invalidates_favorites() {
    let user = fixtures::user("u1", "anna@example.com");
    let no_bans = Vec::<user_ban::Model>::new;
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        // first GET
        .append_query_results([vec![user.clone()]])
        .append_query_results([no_bans()])
        .append_query_results([Vec::<resource::Model>::new()])
        // second GET, served from cache
        .append_query_results([vec![user.clone()]])
        .append_query_results([no_bans()])
        // POST /favorite/r1: resource lookup, then the insert
        .append_query_results([vec![user.clone()]])
        .append_query_results([no_bans()])
        .append_query_results([vec![fixtures::resource("r1", "article", false)]])
        .append_exec_results([MockExecResult {
            last_insert_id: 0,
            rows_affected: 1,
        }])
        // GET after invalidation
        .append_query_results([vec![user.clone()]])
        .append_query_results([no_bans()])
        .append_query_results([vec![fixtures::resource("r1", "article", false)]])
        .into_connection();
    let state = test_state(db);
    let token = token_for(&state, &user.id);
    let router = app(state);

    let first = send(&router, authed("GET", "/api/resources/favorites", &token, None)).await;
    assert_eq!(x_cache(&first), "MISS");
    assert_eq!(json_body(first).await["data"], serde_json::json!([]));
    settle().await;

    let cached = send(&router, authed("GET", "/api/resources/favorites", &token, None)).await;
    assert_eq!(x_cache(&cached), "HIT");

    let added = send(&router, authed("POST", "/api/resources/favorite/r1", &token, None)).await;
    assert_eq!(added.status(), StatusCode::OK);
    settle().await;

    let after = send(&router, authed("GET", "/api/resources/favorites", &token, None)).await;
    assert_eq!(after.status(), StatusCode::OK);
    assert_eq!(x_cache(&after), "MISS");
    let body = json_body(after).await;
    assert_eq!(body["data"][0]["id"], "r1");
}

#[tokio::test]
async fn test_query_order_shares_cache_entry() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([subjects()])
        .into_connection();
    let router = app(test_state(db));

    let first = send(&router, get("/api/tests/subjects?b=2&a=1")).await;
    assert_eq!(x_cache(&first), "MISS");
    settle().await;

    // A second database read would fail: the mock holds one result.
    let second = send(&router, get("/api/tests/subjects?a=1&b=2")).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(x_cache(&second), "HIT");
    assert_eq!(
        second
            .headers()
            .get("x-cache-key")
            .and_then(|v| v.to_str().ok()),
        Some("api:GET:/api/tests/subjects?a=1&b=2")
    );
}

#[tokio::test]
async fn test_error_responses_are_not_cached() {
    // No query results: every read is a database error.
    let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
    let router = app(test_state(db));

    let first = send(&router, get("/api/tests/subjects")).await;
    assert_eq!(first.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(x_cache(&first), "MISS");
    settle().await;

    let second = send(&router, get("/api/tests/subjects")).await;
    assert_eq!(second.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(x_cache(&second), "MISS");
}

struct BrokenStore;

#[async_trait]
impl ResponseCacheStore for BrokenStore {
    async fn get(&self, _key: &str) -> Result<Option<CachedResponse>, CacheError> {
        Err(CacheError::Redis("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _entry: &CachedResponse, _ttl: u64) -> Result<(), CacheError> {
        Err(CacheError::Redis("connection refused".to_string()))
    }

    async fn delete_pattern(&self, _pattern: &str) -> Result<u64, CacheError> {
        Err(CacheError::Redis("connection refused".to_string()))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Err(CacheError::Redis("connection refused".to_string()))
    }

    fn backend(&self) -> CacheBackend {
        CacheBackend::Redis
    }
}

#[tokio::test]
async fn test_broken_cache_store_is_transparent() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([subjects(), subjects()])
        .into_connection();
    let cache = ResponseCache::new(Arc::new(BrokenStore));
    let state = state_with(db, &Config::for_tests(), Some(cache));
    let metrics = state.metrics.clone();
    let router = app(state);

    for _ in 0..2 {
        let response = send(&router, get("/api/tests/subjects")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(x_cache(&response), "MISS");
        let body = json_body(response).await;
        assert_eq!(body["data"].as_array().map(Vec::len), Some(2));
        settle().await;
    }

    assert!(metrics.snapshot().cache_errors >= 2);
}

#[tokio::test]
async fn test_without_cache_routes_pass_through() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([subjects()])
        .into_connection();
    let router = app(state_with(db, &Config::for_tests(), None));

    let response = send(&router, get("/api/tests/subjects")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-cache").is_none());
}

#[tokio::test]
async fn test_api_rate_limit() {
    let mut config = Config::for_tests();
    config.rate_limit = RateLimitSettings {
        api_max: 2,
        ..RateLimitSettings::default()
    };
    let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
    let router = app(state_with(db, &config, None));

    let request = || {
        Request::builder()
            .uri("/api/metrics")
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap()
    };

    for remaining in ["1", "0"] {
        let response = send(&router, request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok()),
            Some(remaining)
        );
    }

    let limited = send(&router, request()).await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().contains_key(header::RETRY_AFTER));
    let body = json_body(limited).await;
    assert_eq!(body["error"], "Too many requests");
    assert!(body["retryAfter"].as_u64().unwrap() > 0);

    // Another client has its own budget.
    let other = Request::builder()
        .uri("/api/metrics")
        .header("x-forwarded-for", "198.51.100.1")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&router, other).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_token_on_protected_route() {
    let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
    let router = app(test_state(db));

    let response = send(&router, get("/api/auth/status")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"], "NO_TOKEN");
}

#[tokio::test]
async fn test_invalid_token_on_protected_route() {
    let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
    let router = app(test_state(db));

    let response = send(&router, authed("GET", "/api/user/profile", "not-a-jwt", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_banned_user_is_rejected_with_details() {
    let ban = fixtures::active_ban("ban1", "u1", "admin1", Utc::now(), Some(24));
    let user = fixtures::banned_user("u1", &ban);
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![user.clone()]])
        .append_query_results([vec![ban.clone()]])
        .into_connection();
    let state = test_state(db);
    let token = token_for(&state, &user.id);
    let router = app(state);

    let response = send(&router, authed("GET", "/api/auth/status", &token, None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = json_body(response).await;
    assert_eq!(body["error"], "USER_BANNED");
    assert_eq!(body["ban_reason"], "spam");
    assert_eq!(body["is_permanent"], false);
    assert!(body["banned_until"].is_string());
    assert!(body["time_left"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_status_for_active_user() {
    let user = fixtures::user("u1", "anna@example.com");
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![user.clone()]])
        .append_query_results([Vec::<user_ban::Model>::new()])
        .into_connection();
    let state = test_state(db);
    let token = token_for(&state, &user.id);
    let router = app(state);

    let response = send(&router, authed("GET", "/api/auth/status", &token, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "active");
}

#[tokio::test]
async fn test_student_cannot_create_content() {
    let student = fixtures::user("u1", "anna@example.com");
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![student.clone()]])
        .append_query_results([Vec::<user_ban::Model>::new()])
        .into_connection();
    let state = test_state(db);
    let token = token_for(&state, &student.id);
    let router = app(state);

    let response = send(
        &router,
        authed(
            "POST",
            "/api/admin/subjects",
            &token,
            Some(serde_json::json!({ "name": "Histology" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_metrics_endpoints() {
    let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
    let router = app(test_state(db));

    let response = send(&router, get("/api/metrics")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["http"]["requestsTotal"].is_u64());
    assert!(body["cache"]["hitRate"].is_f64());

    let response = send(&router, get("/api/metrics/prometheus")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/plain"))
    );
    assert!(response.headers().contains_key("x-response-time"));
}

#[tokio::test]
async fn test_health_reports_cache_backend() {
    let memory = app(test_state(
        MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
    ));
    let response = send(&memory, get("/api/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["redis"], "memory");

    let broken = app(state_with(
        MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
        &Config::for_tests(),
        Some(ResponseCache::new(Arc::new(BrokenStore))),
    ));
    let response = send(&broken, get("/api/health")).await;
    assert_eq!(json_body(response).await["redis"], "error");

    let disabled = app(state_with(
        MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
        &Config::for_tests(),
        None,
    ));
    let response = send(&disabled, get("/api/health")).await;
    assert_eq!(json_body(response).await["redis"], "not_configured");
}

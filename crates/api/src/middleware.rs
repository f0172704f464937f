//! API middleware and shared state.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, header},
    middleware::Next,
    response::Response,
};
use medlearn_common::{AppError, Config, Metrics, ResponseCache, Timer};
use medlearn_core::{
    AccessDecision, AdminService, AuthService, BanService, ContentService, JwtManager,
    QuizService, ResourceService, StatsService, SubscriptionService, UserService,
};
use medlearn_db::{
    repositories::{
        AchievementRepository, BanRepository, ContentRepository, QuizRepository,
        ResourceRepository, SubscriptionRepository, UserRepository,
    },
    schema::SchemaProbe,
};
use sea_orm::DatabaseConnection;
use tracing::{debug, error};

use crate::cache::{CacheLayer, CachePolicy, Invalidation};
use crate::extractors::Identity;
use crate::rate_limit::RateLimiterState;
use crate::response::AccessError;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub auth_service: AuthService,
    pub ban_service: BanService,
    pub content_service: ContentService,
    pub quiz_service: QuizService,
    pub resource_service: ResourceService,
    pub subscription_service: SubscriptionService,
    pub stats_service: StatsService,
    pub user_service: UserService,
    pub admin_service: AdminService,
    /// `None` when caching is disabled.
    pub cache: Option<ResponseCache>,
    pub rate_limiter: RateLimiterState,
    pub metrics: Arc<Metrics>,
    pub db: Arc<DatabaseConnection>,
    pub schema_probe: Arc<SchemaProbe>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire repositories and services over one connection pool.
    #[must_use]
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &Config,
        cache: Option<ResponseCache>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let user_repo = UserRepository::new(Arc::clone(&db));
        let ban_repo = BanRepository::new(Arc::clone(&db));
        let content_repo = ContentRepository::new(Arc::clone(&db));
        let quiz_repo = QuizRepository::new(Arc::clone(&db));
        let resource_repo = ResourceRepository::new(Arc::clone(&db));
        let subscription_repo = SubscriptionRepository::new(Arc::clone(&db));
        let achievement_repo = AchievementRepository::new(Arc::clone(&db));

        let ban_service = BanService::new(ban_repo, user_repo.clone(), metrics.clone());
        let auth_service = AuthService::new(
            user_repo.clone(),
            ban_service.clone(),
            JwtManager::from_config(&config.auth),
            metrics.clone(),
            config.auth.require_email_verification,
        );

        Self {
            auth_service,
            ban_service,
            content_service: ContentService::new(content_repo.clone()),
            quiz_service: QuizService::new(quiz_repo.clone(), content_repo.clone(), metrics.clone()),
            resource_service: ResourceService::new(resource_repo.clone()),
            subscription_service: SubscriptionService::new(subscription_repo.clone()),
            stats_service: StatsService::new(quiz_repo.clone(), content_repo, achievement_repo),
            user_service: UserService::new(user_repo.clone()),
            admin_service: AdminService::new(user_repo, quiz_repo, resource_repo, subscription_repo),
            cache,
            rate_limiter: RateLimiterState::new(&config.rate_limit, metrics.clone()),
            metrics,
            db,
            schema_probe: Arc::new(SchemaProbe::new()),
            started_at: Instant::now(),
        }
    }

    /// Cache state for a route using `policy`.
    #[must_use]
    pub fn cached(&self, policy: CachePolicy) -> CacheLayer {
        CacheLayer::new(self.cache.clone(), policy, self.metrics.clone())
    }

    /// Invalidation state for a route that makes `patterns` stale.
    #[must_use]
    pub fn invalidates(&self, patterns: &'static [&'static str]) -> Invalidation {
        Invalidation::new(self.cache.clone(), patterns, self.metrics.clone())
    }
}

fn bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the bearer token into an [`Identity`] and run the ban check.
///
/// Refusals are recorded, not returned; the extractors decide whether a
/// route needs an identity. A failed ban check never yields a user.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let identity = match bearer_token(&req) {
        None => Identity::Anonymous,
        Some(token) => resolve(&state, token).await,
    };

    if let Identity::User { user, .. } = &identity {
        req.extensions_mut().insert(user.clone());
    }
    req.extensions_mut().insert(identity);

    next.run(req).await
}

async fn resolve(state: &AppState, token: &str) -> Identity {
    let claims = match state.auth_service.jwt().validate_access(token) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "Rejected access token");
            return Identity::Rejected(AccessError::InvalidToken);
        }
    };

    match state.ban_service.check_access(&claims.user_id).await {
        Ok(AccessDecision::Allow { user, ban_lifted }) => Identity::User { user, ban_lifted },
        Ok(AccessDecision::Deny(reason)) => {
            debug!(user_id = %claims.user_id, reason = ?reason, "Access denied");
            Identity::Rejected(AccessError::Denied(reason))
        }
        Err(AppError::UserNotFound(_) | AppError::NotFound(_)) => {
            Identity::Rejected(AccessError::UserNotFound)
        }
        Err(e) => {
            error!(user_id = %claims.user_id, error = %e, "Ban check failed");
            Identity::Rejected(AccessError::Internal)
        }
    }
}

/// Count the request and stamp `X-Response-Time`.
pub async fn track_requests(
    State(metrics): State<Arc<Metrics>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let timer = Timer::start();
    metrics.start_request();

    let mut response = next.run(req).await;

    let elapsed = timer.elapsed();
    metrics.end_request();
    metrics.record_http_request(response.status().as_u16(), elapsed);

    let took = format!("{:.2}ms", elapsed.as_secs_f64() * 1000.0);
    if let Ok(value) = HeaderValue::from_str(&took) {
        response.headers_mut().insert("X-Response-Time", value);
    }
    response
}

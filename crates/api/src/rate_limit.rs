//! API rate limiting middleware.
//!
//! Fixed windows per client IP. Three independent scopes exist: the whole
//! API, the authentication endpoints and quiz attempts. A request can count
//! against more than one scope.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use medlearn_common::{Metrics, config::RateLimitSettings};
use serde_json::json;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// General API and auth window.
const LONG_WINDOW_SECS: u64 = 15 * 60;
/// Quiz attempt window.
const QUIZ_WINDOW_SECS: u64 = 5 * 60;

/// Rate limit configuration for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl RateLimitConfig {
    #[must_use]
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }
}

/// Which budget a request is charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    Api,
    Auth,
    Quiz,
}

impl RateLimitScope {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Auth => "auth",
            Self::Quiz => "quiz",
        }
    }
}

#[derive(Debug, Clone)]
struct Window {
    count: u32,
    started: Instant,
}

/// Fixed-window counter keyed by client.
#[derive(Clone, Default)]
pub struct ApiRateLimiter {
    windows: Arc<RwLock<HashMap<String, Window>>>,
}

impl ApiRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request for `key` and report whether it may proceed.
    pub async fn check(&self, key: &str, config: &RateLimitConfig) -> RateLimitResult {
        self.check_at(key, config, Instant::now()).await
    }

    async fn check_at(&self, key: &str, config: &RateLimitConfig, now: Instant) -> RateLimitResult {
        let window_len = Duration::from_secs(config.window_secs);
        let mut windows = self.windows.write().await;
        let window = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });

        if now.duration_since(window.started) >= window_len {
            window.count = 0;
            window.started = now;
        }

        let reset = window_len
            .saturating_sub(now.duration_since(window.started))
            .as_secs()
            .max(1);

        if window.count >= config.max_requests {
            return RateLimitResult::Limited { retry_after: reset };
        }

        window.count += 1;
        RateLimitResult::Allowed {
            remaining: config.max_requests - window.count,
            limit: config.max_requests,
            reset,
        }
    }

    /// Drop windows that ended at least `max_age` ago.
    pub async fn prune(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.write().await;
        let before = windows.len();
        windows.retain(|_, w| now.duration_since(w.started) < max_age);
        before - windows.len()
    }

    pub async fn key_count(&self) -> usize {
        self.windows.read().await.len()
    }
}

/// Rate limit check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed {
        /// Requests left in this window.
        remaining: u32,
        limit: u32,
        /// Seconds until the window resets.
        reset: u64,
    },
    Limited {
        /// Seconds until the window resets.
        retry_after: u64,
    },
}

#[derive(Clone)]
struct ScopedLimiter {
    limiter: ApiRateLimiter,
    config: RateLimitConfig,
}

impl ScopedLimiter {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            limiter: ApiRateLimiter::new(),
            config,
        }
    }
}

/// Limiter state shared by the rate limit middlewares.
#[derive(Clone)]
pub struct RateLimiterState {
    api: ScopedLimiter,
    auth: ScopedLimiter,
    quiz: ScopedLimiter,
    metrics: Arc<Metrics>,
}

impl RateLimiterState {
    #[must_use]
    pub fn new(settings: &RateLimitSettings, metrics: Arc<Metrics>) -> Self {
        Self {
            api: ScopedLimiter::new(RateLimitConfig::new(settings.api_max, LONG_WINDOW_SECS)),
            auth: ScopedLimiter::new(RateLimitConfig::new(settings.auth_max, LONG_WINDOW_SECS)),
            quiz: ScopedLimiter::new(RateLimitConfig::new(settings.quiz_max, QUIZ_WINDOW_SECS)),
            metrics,
        }
    }

    const fn scope(&self, scope: RateLimitScope) -> &ScopedLimiter {
        match scope {
            RateLimitScope::Api => &self.api,
            RateLimitScope::Auth => &self.auth,
            RateLimitScope::Quiz => &self.quiz,
        }
    }

    /// Remove stale windows from every scope.
    pub async fn prune(&self) -> usize {
        let mut removed = 0;
        for scoped in [&self.api, &self.auth, &self.quiz] {
            removed += scoped
                .limiter
                .prune(Duration::from_secs(scoped.config.window_secs))
                .await;
        }
        removed
    }

    /// Prune stale windows every `period` until the task is aborted.
    pub fn spawn_pruner(&self, period: Duration) -> JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let removed = state.prune().await;
                if removed > 0 {
                    debug!(removed, "Pruned rate limit windows");
                }
            }
        })
    }
}

/// Rate limit error response.
#[derive(Debug)]
pub struct RateLimitError {
    pub retry_after: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Too many requests",
                "retryAfter": self.retry_after,
            })),
        )
            .into_response();
        response
            .headers_mut()
            .insert("Retry-After", HeaderValue::from(self.retry_after));
        response
    }
}

/// Client IP: `X-Forwarded-For`, then `X-Real-IP`, then the socket peer.
fn client_ip(req: &Request<Body>) -> Option<IpAddr> {
    let headers = req.headers();

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok());
    if forwarded.is_some() {
        return forwarded;
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
    if real_ip.is_some() {
        return real_ip;
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Budget for every `/api` request.
pub async fn rate_limit_api(
    State(limiter): State<RateLimiterState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, RateLimitError> {
    rate_limit_scoped(&limiter, RateLimitScope::Api, req, next).await
}

/// Extra budget for `/api/auth`.
pub async fn rate_limit_auth(
    State(limiter): State<RateLimiterState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, RateLimitError> {
    rate_limit_scoped(&limiter, RateLimitScope::Auth, req, next).await
}

/// Budget for starting and finishing quizzes.
pub async fn rate_limit_quiz(
    State(limiter): State<RateLimiterState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, RateLimitError> {
    rate_limit_scoped(&limiter, RateLimitScope::Quiz, req, next).await
}

async fn rate_limit_scoped(
    state: &RateLimiterState,
    scope: RateLimitScope,
    req: Request<Body>,
    next: Next,
) -> Result<Response, RateLimitError> {
    let key = client_ip(&req).map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
    let scoped = state.scope(scope);

    match scoped.limiter.check(&key, &scoped.config).await {
        RateLimitResult::Allowed {
            remaining,
            limit,
            reset,
        } => {
            let mut response = next.run(req).await;
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", limit.into());
            headers.insert("X-RateLimit-Remaining", remaining.into());
            headers.insert("X-RateLimit-Reset", reset.into());
            Ok(response)
        }
        RateLimitResult::Limited { retry_after } => {
            state.metrics.record_rate_limited();
            warn!(client = %key, scope = scope.as_str(), retry_after, "Rate limit exceeded");
            Err(RateLimitError { retry_after })
        }
    }
}

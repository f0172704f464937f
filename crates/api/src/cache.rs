//! Response cache middleware.
//!
//! Cache-aside for idempotent reads. A route opts in with a [`CachePolicy`];
//! mutating routes name the key families they make stale. The backing store
//! is an optimization only: when it fails, requests behave as misses.
//!
//! Keys look like `api:GET:/api/tests/subjects?a=1&b=2:userId:01h...`. Query
//! pairs are sorted so parameter order does not matter.

use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    extract::{OriginalUri, State},
    http::{HeaderName, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use medlearn_common::{CachedResponse, Metrics, ResponseCache};
use medlearn_core::RoleCapabilities;
use medlearn_db::entities::user;
use tracing::{debug, error, info};

pub const X_CACHE: &str = "x-cache";
pub const X_CACHE_KEY: &str = "x-cache-key";

/// A request attribute folded into the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaryBy {
    /// The authenticated user's id, or `anonymous`.
    UserId,
    /// The value of a request header.
    Header(&'static str),
}

/// How a route's responses are cached.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub ttl_secs: u64,
    /// Only cache when this returns true.
    pub condition: fn(&Request<Body>) -> bool,
    pub vary_by: &'static [VaryBy],
}

const fn always(_: &Request<Body>) -> bool {
    true
}

fn is_authenticated(req: &Request<Body>) -> bool {
    req.extensions().get::<user::Model>().is_some()
}

/// Teachers and admins. Used where a cache hit would skip a capability check.
pub fn is_staff(req: &Request<Body>) -> bool {
    req.extensions()
        .get::<user::Model>()
        .is_some_and(|u| u.role.is_elevated())
}

impl CachePolicy {
    /// Collections that change when content is edited.
    pub const LIST: Self = Self {
        ttl_secs: 300,
        condition: always,
        vary_by: &[],
    };

    /// Single items.
    pub const DETAIL: Self = Self {
        ttl_secs: 3600,
        condition: always,
        vary_by: &[],
    };

    /// Per-user data. Anonymous requests are never cached.
    pub const USER: Self = Self {
        ttl_secs: 1800,
        condition: is_authenticated,
        vary_by: &[VaryBy::UserId],
    };

    /// Data that practically never changes.
    pub const STATIC: Self = Self {
        ttl_secs: 86400,
        condition: always,
        vary_by: &[],
    };

    /// Same policy, with a different vary-by list.
    #[must_use]
    pub const fn vary(self, vary_by: &'static [VaryBy]) -> Self {
        Self { vary_by, ..self }
    }

    /// Same policy, gated by `condition`.
    #[must_use]
    pub const fn when(self, condition: fn(&Request<Body>) -> bool) -> Self {
        Self { condition, ..self }
    }
}

/// Glob families removed after related writes.
pub mod families {
    pub const TESTS: &[&str] = &["api:GET:/api/tests*", "api:GET:/api/admin/tests*"];
    pub const USERS: &[&str] = &["api:GET:/api/user*", "api:GET:/api/stats*"];
    pub const RESOURCES: &[&str] = &["api:GET:/api/resources*"];
    /// Per-user data plus the reader-dependent resource lists. Favorites and
    /// premium status both feed `/api/resources` bodies.
    pub const MEMBERSHIP: &[&str] = &[
        "api:GET:/api/user*",
        "api:GET:/api/stats*",
        "api:GET:/api/resources*",
    ];
    pub const CONTENT_TREE: &[&str] = &["api:GET:/api/tests*"];
}

/// Derive the cache key for `req`.
#[must_use]
pub fn cache_key(req: &Request<Body>, vary_by: &[VaryBy]) -> String {
    let uri = req
        .extensions()
        .get::<OriginalUri>()
        .map_or_else(|| req.uri(), |OriginalUri(uri)| uri);

    let mut key = format!("api:{}:{}", req.method(), uri.path());
    if let Some(query) = uri.query().map(canonical_query).filter(|q| !q.is_empty()) {
        key.push('?');
        key.push_str(&query);
    }

    for attribute in vary_by {
        match attribute {
            VaryBy::UserId => {
                let id = req
                    .extensions()
                    .get::<user::Model>()
                    .map_or("anonymous", |u| u.id.as_str());
                key.push_str(":userId:");
                key.push_str(id);
            }
            VaryBy::Header(name) => {
                if let Some(value) = req.headers().get(*name).and_then(|v| v.to_str().ok()) {
                    key.push(':');
                    key.push_str(name);
                    key.push(':');
                    key.push_str(value);
                }
            }
        }
    }
    key
}

/// `b=2&a=1` and `a=1&b=2` both become `a=1&b=2`.
fn canonical_query(query: &str) -> String {
    let mut pairs: Vec<(&str, &str)> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| p.split_once('=').unwrap_or((p, "")))
        .collect();
    pairs.sort_unstable();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// State of one cached route.
#[derive(Clone)]
pub struct CacheLayer {
    cache: Option<ResponseCache>,
    policy: CachePolicy,
    metrics: Arc<Metrics>,
}

impl CacheLayer {
    #[must_use]
    pub const fn new(cache: Option<ResponseCache>, policy: CachePolicy, metrics: Arc<Metrics>) -> Self {
        Self {
            cache,
            policy,
            metrics,
        }
    }
}

/// Serve GET/HEAD from the cache, or run the handler and store a 2xx result.
pub async fn response_cache(
    State(layer): State<CacheLayer>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(cache) = layer.cache.clone() else {
        return next.run(req).await;
    };
    if !matches!(*req.method(), Method::GET | Method::HEAD) || !(layer.policy.condition)(&req) {
        return next.run(req).await;
    }

    let key = cache_key(&req, layer.policy.vary_by);

    match cache.get(&key).await {
        Ok(Some(hit)) => {
            layer.metrics.record_cache_lookup(true);
            debug!(key = %key, "Cache hit");
            return replay(hit, &key);
        }
        Ok(None) => layer.metrics.record_cache_lookup(false),
        Err(e) => {
            debug!(key = %key, error = %e, "Cache read failed, treating as miss");
            layer.metrics.record_cache_error();
            layer.metrics.record_cache_lookup(false);
        }
    }

    let response = next.run(req).await;
    if !response.status().is_success() {
        return mark(response, "MISS", &key);
    }

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(key = %key, error = %e, "Failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Ok(text) = std::str::from_utf8(&bytes) {
        let entry = CachedResponse {
            status: parts.status.as_u16(),
            headers: parts
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|ct| vec![(header::CONTENT_TYPE.to_string(), ct.to_string())])
                .unwrap_or_default(),
            body: text.to_string(),
        };
        let ttl = layer.policy.ttl_secs;
        let metrics = layer.metrics.clone();
        let write_key = key.clone();

        // The response does not wait for the write.
        tokio::spawn(async move {
            match cache.set(&write_key, &entry, ttl).await {
                Ok(()) => metrics.record_cache_write(true),
                Err(e) => {
                    error!(key = %write_key, error = %e, "Cache write failed");
                    metrics.record_cache_write(false);
                }
            }
        });
    }

    mark(Response::from_parts(parts, Body::from(bytes)), "MISS", &key)
}

fn replay(hit: CachedResponse, key: &str) -> Response {
    let status = StatusCode::from_u16(hit.status).unwrap_or(StatusCode::OK);
    let mut response = (status, hit.body).into_response();

    let headers = response.headers_mut();
    headers.remove(header::CONTENT_TYPE);
    for (name, value) in &hit.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    mark(response, "HIT", key)
}

fn mark(mut response: Response, outcome: &'static str, key: &str) -> Response {
    let headers = response.headers_mut();
    headers.insert(X_CACHE, HeaderValue::from_static(outcome));
    if let Ok(value) = HeaderValue::from_str(key) {
        headers.insert(X_CACHE_KEY, value);
    }
    response
}

/// State of one invalidating route.
#[derive(Clone)]
pub struct Invalidation {
    cache: Option<ResponseCache>,
    patterns: &'static [&'static str],
    metrics: Arc<Metrics>,
}

impl Invalidation {
    #[must_use]
    pub const fn new(
        cache: Option<ResponseCache>,
        patterns: &'static [&'static str],
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cache,
            patterns,
            metrics,
        }
    }
}

/// After a successful write, drop the cached reads it made stale.
pub async fn invalidate_cache(
    State(invalidation): State<Invalidation>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let mutating = matches!(
        *req.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );
    let response = next.run(req).await;

    if mutating
        && response.status().is_success()
        && let Some(cache) = invalidation.cache
    {
        let patterns = invalidation.patterns;
        let metrics = invalidation.metrics;
        tokio::spawn(async move {
            let deleted = cache.invalidate(patterns).await;
            metrics.record_cache_invalidation(deleted);
            info!(deleted, patterns = ?patterns, "Cache invalidated");
        });
    }
    response
}

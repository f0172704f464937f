//! Metrics collection for medlearn.
//!
//! Process-wide counters exposed by the `/api/metrics` endpoints.

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global metrics instance.
static METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// Get the global metrics instance.
pub fn get_metrics() -> &'static Arc<Metrics> {
    METRICS.get_or_init(|| Arc::new(Metrics::new()))
}

/// Application metrics collector.
#[derive(Debug)]
pub struct Metrics {
    // === Request Metrics ===
    /// Total HTTP requests received
    pub http_requests_total: AtomicU64,
    /// Active HTTP requests
    pub http_requests_active: AtomicU64,
    /// HTTP requests by status code category
    pub http_requests_2xx: AtomicU64,
    pub http_requests_4xx: AtomicU64,
    pub http_requests_5xx: AtomicU64,
    /// Total request latency in microseconds
    pub http_request_latency_us_total: AtomicU64,
    /// Requests rejected by the rate limiter
    pub http_rate_limited: AtomicU64,

    // === Response Cache ===
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    /// Entries written after a miss
    pub cache_writes: AtomicU64,
    /// Reads or writes that failed against the backing store
    pub cache_errors: AtomicU64,
    /// Keys removed by pattern invalidation
    pub cache_invalidated_keys: AtomicU64,

    // === Access Control ===
    pub bans_issued: AtomicU64,
    pub bans_lifted: AtomicU64,
    /// Bans closed because their expiry passed
    pub bans_expired: AtomicU64,
    pub logins_succeeded: AtomicU64,
    pub logins_failed: AtomicU64,

    // === Learning ===
    pub quiz_attempts: AtomicU64,
}

impl Metrics {
    /// Create a new metrics instance with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            http_requests_total: AtomicU64::new(0),
            http_requests_active: AtomicU64::new(0),
            http_requests_2xx: AtomicU64::new(0),
            http_requests_4xx: AtomicU64::new(0),
            http_requests_5xx: AtomicU64::new(0),
            http_request_latency_us_total: AtomicU64::new(0),
            http_rate_limited: AtomicU64::new(0),

            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_writes: AtomicU64::new(0),
            cache_errors: AtomicU64::new(0),
            cache_invalidated_keys: AtomicU64::new(0),

            bans_issued: AtomicU64::new(0),
            bans_lifted: AtomicU64::new(0),
            bans_expired: AtomicU64::new(0),
            logins_succeeded: AtomicU64::new(0),
            logins_failed: AtomicU64::new(0),

            quiz_attempts: AtomicU64::new(0),
        }
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, status_code: u16, latency: Duration) {
        self.http_requests_total.fetch_add(1, Ordering::Relaxed);

        match status_code {
            200..=299 => self.http_requests_2xx.fetch_add(1, Ordering::Relaxed),
            400..=499 => self.http_requests_4xx.fetch_add(1, Ordering::Relaxed),
            500..=599 => self.http_requests_5xx.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };

        self.http_request_latency_us_total
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// Start tracking an active request.
    pub fn start_request(&self) {
        self.http_requests_active.fetch_add(1, Ordering::Relaxed);
    }

    /// End tracking an active request.
    pub fn end_request(&self) {
        self.http_requests_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a rate limit rejection.
    pub fn record_rate_limited(&self) {
        self.http_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a response cache lookup.
    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the outcome of a background cache write.
    pub fn record_cache_write(&self, ok: bool) {
        if ok {
            self.cache_writes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a failed cache read.
    pub fn record_cache_error(&self) {
        self.cache_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record keys removed by an invalidation pass.
    pub fn record_cache_invalidation(&self, deleted: u64) {
        self.cache_invalidated_keys
            .fetch_add(deleted, Ordering::Relaxed);
    }

    pub fn record_ban_issued(&self) {
        self.bans_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ban_lifted(&self) {
        self.bans_lifted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bans_expired(&self, count: u64) {
        self.bans_expired.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a login attempt.
    pub fn record_login(&self, success: bool) {
        if success {
            self.logins_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.logins_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_quiz_attempt(&self) {
        self.quiz_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.http_requests_total.load(Ordering::Relaxed);
        let latency_total = self.http_request_latency_us_total.load(Ordering::Relaxed);
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);

        MetricsSnapshot {
            http_requests_total: total,
            http_requests_active: self.http_requests_active.load(Ordering::Relaxed),
            http_requests_2xx: self.http_requests_2xx.load(Ordering::Relaxed),
            http_requests_4xx: self.http_requests_4xx.load(Ordering::Relaxed),
            http_requests_5xx: self.http_requests_5xx.load(Ordering::Relaxed),
            http_request_latency_avg_us: if total > 0 { latency_total / total } else { 0 },
            http_rate_limited: self.http_rate_limited.load(Ordering::Relaxed),

            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate: if hits + misses > 0 {
                hits as f64 / (hits + misses) as f64
            } else {
                0.0
            },
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
            cache_invalidated_keys: self.cache_invalidated_keys.load(Ordering::Relaxed),

            bans_issued: self.bans_issued.load(Ordering::Relaxed),
            bans_lifted: self.bans_lifted.load(Ordering::Relaxed),
            bans_expired: self.bans_expired.load(Ordering::Relaxed),
            logins_succeeded: self.logins_succeeded.load(Ordering::Relaxed),
            logins_failed: self.logins_failed.load(Ordering::Relaxed),

            quiz_attempts: self.quiz_attempts.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut output = String::new();

        let counters: [(&str, &str, u64); 14] = [
            ("medlearn_http_requests_total", "Total HTTP requests", s.http_requests_total),
            ("medlearn_http_rate_limited_total", "Requests rejected by the rate limiter", s.http_rate_limited),
            ("medlearn_cache_hits_total", "Response cache hits", s.cache_hits),
            ("medlearn_cache_misses_total", "Response cache misses", s.cache_misses),
            ("medlearn_cache_writes_total", "Response cache writes", s.cache_writes),
            ("medlearn_cache_errors_total", "Response cache backend failures", s.cache_errors),
            ("medlearn_cache_invalidated_keys_total", "Keys removed by invalidation", s.cache_invalidated_keys),
            ("medlearn_bans_issued_total", "Bans issued", s.bans_issued),
            ("medlearn_bans_lifted_total", "Bans lifted by an administrator", s.bans_lifted),
            ("medlearn_bans_expired_total", "Bans closed after expiry", s.bans_expired),
            ("medlearn_logins_succeeded_total", "Successful logins", s.logins_succeeded),
            ("medlearn_logins_failed_total", "Failed logins", s.logins_failed),
            ("medlearn_quiz_attempts_total", "Finished quiz attempts", s.quiz_attempts),
            ("medlearn_http_request_latency_avg_us", "Average request latency", s.http_request_latency_avg_us),
        ];

        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {name} {help}");
            let _ = writeln!(output, "# TYPE {name} counter");
            let _ = writeln!(output, "{name} {value}");
        }

        output.push_str("# HELP medlearn_http_requests_active Active HTTP requests\n");
        output.push_str("# TYPE medlearn_http_requests_active gauge\n");
        let _ = writeln!(output, "medlearn_http_requests_active {}", s.http_requests_active);

        output.push_str("# HELP medlearn_http_requests_by_status HTTP requests by status\n");
        output.push_str("# TYPE medlearn_http_requests_by_status counter\n");
        for (class, value) in [
            ("2xx", s.http_requests_2xx),
            ("4xx", s.http_requests_4xx),
            ("5xx", s.http_requests_5xx),
        ] {
            let _ = writeln!(
                output,
                "medlearn_http_requests_by_status{{status=\"{class}\"}} {value}"
            );
        }

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    // HTTP
    pub http_requests_total: u64,
    pub http_requests_active: u64,
    pub http_requests_2xx: u64,
    pub http_requests_4xx: u64,
    pub http_requests_5xx: u64,
    pub http_request_latency_avg_us: u64,
    pub http_rate_limited: u64,

    // Cache
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub cache_writes: u64,
    pub cache_errors: u64,
    pub cache_invalidated_keys: u64,

    // Access control
    pub bans_issued: u64,
    pub bans_lifted: u64,
    pub bans_expired: u64,
    pub logins_succeeded: u64,
    pub logins_failed: u64,

    // Learning
    pub quiz_attempts: u64,
}

/// Timer guard for measuring operation duration.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_http_request() {
        let metrics = Metrics::new();

        metrics.record_http_request(200, Duration::from_millis(50));
        metrics.record_http_request(404, Duration::from_millis(10));
        metrics.record_http_request(500, Duration::from_millis(100));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.http_requests_total, 3);
        assert_eq!(snapshot.http_requests_2xx, 1);
        assert_eq!(snapshot.http_requests_4xx, 1);
        assert_eq!(snapshot.http_requests_5xx, 1);
        assert_eq!(snapshot.http_request_latency_avg_us, 160_000 / 3);
    }

    #[test]
    fn test_cache_hit_rate() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot().cache_hit_rate, 0.0);

        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(false);

        assert_eq!(metrics.snapshot().cache_hit_rate, 0.75);
    }

    #[test]
    fn test_prometheus_output() {
        let metrics = Metrics::new();
        metrics.record_ban_issued();
        metrics.record_bans_expired(2);

        let output = metrics.to_prometheus();
        assert!(output.contains("medlearn_bans_issued_total 1"));
        assert!(output.contains("medlearn_bans_expired_total 2"));
        assert!(output.contains("medlearn_http_requests_by_status{status=\"5xx\"} 0"));
    }
}

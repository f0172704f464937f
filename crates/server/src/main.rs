//! medlearn server entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fred::prelude::*;
use fred::types::config::{ConnectionConfig, PerformanceConfig, ReconnectPolicy};
use medlearn_api::{AppState, app};
use medlearn_common::{
    Config, InMemoryCacheStore, RedisCacheStore, ResponseCache,
    config::{CacheBackend, RedisConfig},
    get_metrics,
};
use medlearn_core::{JobService, JobWorkerContext};
use tokio::{signal, sync::watch, task::JoinHandle};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// How often idle rate-limit windows are dropped.
const RATE_LIMIT_PRUNE_PERIOD: Duration = Duration::from_secs(60);

/// How often expired in-memory cache entries are purged.
const CACHE_PURGE_PERIOD: Duration = Duration::from_secs(60);

/// Startup gives up on Redis after this long and runs without a cache.
const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// First reconnect delay and growth factor for Redis.
const REDIS_RECONNECT_MIN_DELAY_MS: u32 = 100;
const REDIS_RECONNECT_BASE: u32 = 2;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "medlearn=debug,tower_http=debug".into());
    let json = std::env::var("MEDLEARN_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// The configured response cache, plus the purge task of an in-memory store.
/// A Redis connection failure disables caching instead of aborting startup.
async fn connect_cache(config: &Config) -> (Option<ResponseCache>, Option<JoinHandle<()>>) {
    if !config.cache.enabled {
        info!("Response cache disabled");
        return (None, None);
    }

    match config.cache.backend {
        CacheBackend::Memory => {
            info!("Using in-memory response cache");
            let store = InMemoryCacheStore::new();
            let purger = store.spawn_purger(CACHE_PURGE_PERIOD);
            (Some(ResponseCache::new(Arc::new(store))), Some(purger))
        }
        CacheBackend::Redis => match connect_redis(&config.redis).await {
            Ok(client) => {
                info!("Connected to Redis response cache");
                let store = RedisCacheStore::new(Arc::new(client), config.redis.prefix.clone());
                (Some(ResponseCache::new(Arc::new(store))), None)
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, response cache disabled");
                (None, None)
            }
        },
    }
}

async fn connect_redis(redis: &RedisConfig) -> anyhow::Result<Client> {
    let fred_config =
        fred::types::config::Config::from_url(&redis.url).context("invalid Redis URL")?;
    let perf = PerformanceConfig {
        default_command_timeout: Duration::from_millis(redis.command_timeout_ms),
        ..PerformanceConfig::default()
    };
    let connection = ConnectionConfig {
        connection_timeout: REDIS_CONNECT_TIMEOUT,
        ..ConnectionConfig::default()
    };
    // Unlimited attempts; the cache is back as soon as Redis is.
    let policy = ReconnectPolicy::new_exponential(
        0,
        REDIS_RECONNECT_MIN_DELAY_MS,
        redis.reconnect_max_delay_ms,
        REDIS_RECONNECT_BASE,
    );

    let client = Client::new(fred_config, Some(perf), Some(connection), Some(policy));
    let connection_task = client.connect();
    // With unlimited reconnects the first attempt may never report failure.
    match tokio::time::timeout(REDIS_CONNECT_TIMEOUT, client.wait_for_connect()).await {
        Ok(Ok(())) => Ok(client),
        Ok(Err(e)) => {
            connection_task.abort();
            Err(e).context("failed to connect to Redis")
        }
        Err(_) => {
            connection_task.abort();
            anyhow::bail!("timed out connecting to Redis")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting medlearn server...");

    let config = Config::load().context("failed to load configuration")?;

    let db = medlearn_db::init(&config).await?;
    info!("Connected to database");

    info!("Running database migrations...");
    medlearn_db::migrate(&db).await?;
    info!("Migrations completed");

    let (cache, cache_purger) = connect_cache(&config).await;
    let state = AppState::new(Arc::new(db), &config, cache, get_metrics().clone());

    // Background work
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let jobs = JobService::new().start(
        JobWorkerContext {
            ban_service: state.ban_service.clone(),
            ban_sweep_interval: Duration::from_secs(config.jobs.ban_sweep_interval_secs),
        },
        shutdown_rx,
    );
    let pruner = state.rate_limiter.spawn_pruner(RATE_LIMIT_PRUNE_PERIOD);

    let router = app(state);

    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.server.host, config.server.port))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let _ = shutdown_tx.send(true);
    pruner.abort();
    if let Some(purger) = cache_purger {
        purger.abort();
    }
    if let Err(e) = jobs.await {
        error!(error = %e, "Job worker ended abnormally");
    }

    info!("Server shutdown complete");
    Ok(())
}

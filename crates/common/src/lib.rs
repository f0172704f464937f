//! Common utilities and shared types for medlearn.
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **ID Generation**: ULID-based unique identifiers via [`IdGenerator`]
//! - **Metrics**: Process-wide counters via [`Metrics`]
//! - **Response cache**: Redis or in-memory storage for cached API responses
//!
//! # Example
//!
//! ```no_run
//! use medlearn_common::{Config, IdGenerator, AppResult};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id = IdGenerator::new().generate();
//!     println!("{} listening on port {}", id, config.server.port);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;
pub mod metrics;
pub mod response_cache;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
pub use metrics::{Metrics, MetricsSnapshot, Timer, get_metrics};
pub use response_cache::{
    CacheError, CachedResponse, InMemoryCacheStore, RedisCacheStore, ResponseCache,
    ResponseCacheStore,
};

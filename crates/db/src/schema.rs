//! One-shot schema readiness probe.
//!
//! The first caller introspects `information_schema` for the `user` table;
//! concurrent first callers wait on the same check and later callers read
//! the memoized answer. A failed probe is not memoized.

use medlearn_common::{AppError, AppResult};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use tokio::sync::OnceCell;
use tracing::info;

const USER_TABLE_EXISTS_SQL: &str = "SELECT EXISTS (\
    SELECT 1 FROM information_schema.tables \
    WHERE table_schema = 'public' AND table_name = 'user'\
) AS present";

/// Memoized answer to "has the schema been migrated?".
#[derive(Debug, Default)]
pub struct SchemaProbe {
    ready: OnceCell<bool>,
}

impl SchemaProbe {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ready: OnceCell::const_new(),
        }
    }

    /// Whether the core tables exist. Runs at most one successful query per process.
    pub async fn is_ready<C: ConnectionTrait>(&self, db: &C) -> AppResult<bool> {
        self.ready
            .get_or_try_init(|| async {
                let row = db
                    .query_one(Statement::from_string(
                        DatabaseBackend::Postgres,
                        USER_TABLE_EXISTS_SQL.to_string(),
                    ))
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;

                let present = match row {
                    Some(row) => row
                        .try_get::<bool>("", "present")
                        .map_err(|e| AppError::Database(e.to_string()))?,
                    None => false,
                };

                info!(present, "Schema probe finished");
                Ok::<bool, AppError>(present)
            })
            .await
            .copied()
    }

    /// The memoized answer, if the probe has already run.
    #[must_use]
    pub fn cached(&self) -> Option<bool> {
        self.ready.get().copied()
    }
}

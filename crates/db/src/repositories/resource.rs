//! Resource repository, including favorites.

use std::sync::Arc;

use crate::entities::{Resource, UserFavorite, resource, user_favorite};
use medlearn_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, FromQueryResult,
    JoinType, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
    TransactionTrait,
    sea_query::{Expr, Func, OnConflict},
};

/// How many resources of one type exist.
#[derive(Debug, Clone, PartialEq, Eq, FromQueryResult)]
pub struct TypeCount {
    pub resource_type: String,
    pub count: i64,
}

/// Resource repository.
#[derive(Clone)]
pub struct ResourceRepository {
    db: Arc<DatabaseConnection>,
}

impl ResourceRepository {
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Published resources, newest first.
    pub async fn list_published(&self) -> AppResult<Vec<resource::Model>> {
        self.published_where(Condition::all()).await
    }

    pub async fn list_by_type(&self, resource_type: &str) -> AppResult<Vec<resource::Model>> {
        self.published_where(Condition::all().add(resource::Column::ResourceType.eq(resource_type)))
            .await
    }

    pub async fn list_by_subject(&self, subject_id: &str) -> AppResult<Vec<resource::Model>> {
        self.published_where(Condition::all().add(resource::Column::SubjectId.eq(subject_id)))
            .await
    }

    /// Case-insensitive search over title and description.
    pub async fn search(&self, query: &str) -> AppResult<Vec<resource::Model>> {
        let pattern = format!(
            "%{}%",
            query
                .trim()
                .to_lowercase()
                .replace('%', "\\%")
                .replace('_', "\\_")
        );

        self.published_where(
            Condition::any()
                .add(Expr::expr(Func::lower(Expr::col(resource::Column::Title))).like(&pattern))
                .add(
                    Expr::expr(Func::lower(Expr::col(resource::Column::Description)))
                        .like(&pattern),
                ),
        )
        .await
    }

    async fn published_where(&self, condition: Condition) -> AppResult<Vec<resource::Model>> {
        Resource::find()
            .filter(resource::Column::IsPublished.eq(true))
            .filter(condition)
            .order_by_desc(resource::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<resource::Model>> {
        Resource::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn create(&self, model: resource::ActiveModel) -> AppResult<resource::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete a resource and every favorite pointing at it.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        UserFavorite::delete_many()
            .filter(user_favorite::Column::ResourceId.eq(id))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let result = Resource::delete_by_id(id)
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("Resource {id}")));
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn increment_views(&self, id: &str) -> AppResult<()> {
        let result = Resource::update_many()
            .col_expr(
                resource::Column::ViewsCount,
                Expr::col(resource::Column::ViewsCount).add(1),
            )
            .filter(resource::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("Resource {id}")));
        }
        Ok(())
    }

    // --- favorites ---

    /// Add a favorite. Returns false when it already existed.
    pub async fn add_favorite(&self, id: String, user_id: &str, resource_id: &str) -> AppResult<bool> {
        let model = user_favorite::ActiveModel {
            id: Set(id),
            user_id: Set(user_id.to_string()),
            resource_id: Set(resource_id.to_string()),
            created_at: Set(chrono::Utc::now().into()),
        };

        let inserted = UserFavorite::insert(model)
            .on_conflict(
                OnConflict::columns([
                    user_favorite::Column::UserId,
                    user_favorite::Column::ResourceId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(inserted > 0)
    }

    /// Remove a favorite. Returns false when there was none.
    pub async fn remove_favorite(&self, user_id: &str, resource_id: &str) -> AppResult<bool> {
        let result = UserFavorite::delete_many()
            .filter(user_favorite::Column::UserId.eq(user_id))
            .filter(user_favorite::Column::ResourceId.eq(resource_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected > 0)
    }

    /// The user's favorite resources, most recently favorited first.
    pub async fn favorites(&self, user_id: &str) -> AppResult<Vec<resource::Model>> {
        Resource::find()
            .join(JoinType::InnerJoin, resource::Relation::Favorites.def())
            .filter(user_favorite::Column::UserId.eq(user_id))
            .order_by_desc(user_favorite::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn is_favorite(&self, user_id: &str, resource_id: &str) -> AppResult<bool> {
        let count = UserFavorite::find()
            .filter(user_favorite::Column::UserId.eq(user_id))
            .filter(user_favorite::Column::ResourceId.eq(resource_id))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(count > 0)
    }

    // --- stats ---

    pub async fn count_published(&self) -> AppResult<u64> {
        Resource::find()
            .filter(resource::Column::IsPublished.eq(true))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn count_by_type(&self) -> AppResult<Vec<TypeCount>> {
        Resource::find()
            .filter(resource::Column::IsPublished.eq(true))
            .select_only()
            .column(resource::Column::ResourceType)
            .column_as(resource::Column::Id.count(), "count")
            .group_by(resource::Column::ResourceType)
            .order_by_asc(resource::Column::ResourceType)
            .into_model::<TypeCount>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn most_viewed(&self, limit: u64) -> AppResult<Vec<resource::Model>> {
        Resource::find()
            .filter(resource::Column::IsPublished.eq(true))
            .order_by_desc(resource::Column::ViewsCount)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Value};
    use std::collections::BTreeMap;

    fn exec(rows: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: rows,
        }
    }

    #[tokio::test]
    async fn test_add_favorite_is_idempotent() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(1), exec(0)])
                .into_connection(),
        );

        let repo = ResourceRepository::new(db);
        assert!(repo.add_favorite("f1".to_string(), "u1", "r1").await.unwrap());
        assert!(!repo.add_favorite("f2".to_string(), "u1", "r1").await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_views_unknown_resource() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0)])
                .into_connection(),
        );

        let repo = ResourceRepository::new(db);
        assert!(matches!(
            repo.increment_views("missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_search_returns_matches() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[fixtures::resource("r1", "article", false)]])
                .into_connection(),
        );

        let repo = ResourceRepository::new(db.clone());
        let found = repo.search("Cardio").await.unwrap();
        assert_eq!(found.len(), 1);
        drop(repo);

        let log = Arc::try_unwrap(db).unwrap().into_transaction_log();
        let sql = format!("{log:?}");
        assert!(sql.contains("LOWER"));
        assert!(sql.contains("%cardio%"));
    }

    #[tokio::test]
    async fn test_count_by_type() {
        let row = |t: &str, n: i64| {
            BTreeMap::from([
                ("resource_type".to_string(), Value::String(Some(Box::new(t.to_string())))),
                ("count".to_string(), Value::BigInt(Some(n))),
            ])
        };
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[row("article", 4), row("video", 2)]])
                .into_connection(),
        );

        let repo = ResourceRepository::new(db);
        let counts = repo.count_by_type().await.unwrap();
        assert_eq!(
            counts[1],
            TypeCount {
                resource_type: "video".to_string(),
                count: 2
            }
        );
    }

    #[tokio::test]
    async fn test_delete_unknown_resource() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0), exec(0)])
                .into_connection(),
        );

        let repo = ResourceRepository::new(db);
        assert!(matches!(
            repo.delete("missing").await,
            Err(AppError::NotFound(_))
        ));
    }
}

//! Achievement repository.

use std::sync::Arc;

use crate::entities::{Achievement, UserAchievement, achievement, user_achievement};
use chrono::{DateTime, Utc};
use medlearn_common::{AppError, AppResult};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    sea_query::OnConflict,
};

#[derive(Clone)]
pub struct AchievementRepository {
    db: Arc<DatabaseConnection>,
}

impl AchievementRepository {
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn list_all(&self) -> AppResult<Vec<achievement::Model>> {
        Achievement::find()
            .order_by_asc(achievement::Column::Points)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn find_by_code(&self, code: &str) -> AppResult<Option<achievement::Model>> {
        Achievement::find()
            .filter(achievement::Column::Code.eq(code))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn earned(&self, user_id: &str) -> AppResult<Vec<user_achievement::Model>> {
        UserAchievement::find()
            .filter(user_achievement::Column::UserId.eq(user_id))
            .order_by_asc(user_achievement::Column::EarnedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Record that a user earned an achievement.
    /// Returns false when it was already earned.
    pub async fn award(
        &self,
        id: String,
        user_id: &str,
        achievement_id: &str,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let model = user_achievement::ActiveModel {
            id: Set(id),
            user_id: Set(user_id.to_string()),
            achievement_id: Set(achievement_id.to_string()),
            earned_at: Set(at.into()),
        };

        let inserted = UserAchievement::insert(model)
            .on_conflict(
                OnConflict::columns([
                    user_achievement::Column::UserId,
                    user_achievement::Column::AchievementId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(inserted > 0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    #[tokio::test]
    async fn test_award_twice_inserts_once() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 0,
                    },
                ])
                .into_connection(),
        );

        let repo = AchievementRepository::new(db);
        let now = Utc::now();
        assert!(repo.award("ua1".to_string(), "u1", "ach_first_test", now).await.unwrap());
        assert!(!repo.award("ua2".to_string(), "u1", "ach_first_test", now).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_by_code() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[fixtures::achievement("ach_high_score", "high_score")]])
                .into_connection(),
        );

        let repo = AchievementRepository::new(db);
        let found = repo.find_by_code("high_score").await.unwrap().unwrap();
        assert_eq!(found.id, "ach_high_score");
    }
}

//! User repository.

use std::sync::Arc;

use crate::entities::{
    Subscription, TestAttempt, User, UserAchievement, UserBan, UserFavorite, subscription,
    test_attempt, user, user::Role, user_achievement, user_ban, user_favorite,
};
use chrono::{DateTime, Utc};
use medlearn_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait, sea_query::Expr,
};

/// Counts shown on the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserCounts {
    pub total: u64,
    pub verified: u64,
    pub premium: u64,
    pub banned: u64,
    pub deleted: u64,
    pub students: u64,
    pub teachers: u64,
    pub admins: u64,
}

/// User repository for database operations.
#[derive(Clone)]
pub struct UserRepository {
    db: Arc<DatabaseConnection>,
}

impl UserRepository {
    /// Create a new user repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a user by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<user::Model>> {
        User::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a user by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<user::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(id.to_string()))
    }

    /// Find a user by (already normalized) email.
    pub async fn find_by_email(&self, email: &str) -> AppResult<Option<user::Model>> {
        User::find()
            .filter(user::Column::Email.eq(email))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Users with the given ids, in no particular order.
    pub async fn find_many(&self, ids: Vec<String>) -> AppResult<Vec<user::Model>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        User::find()
            .filter(user::Column::Id.is_in(ids))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new user.
    pub async fn create(&self, model: user::ActiveModel) -> AppResult<user::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Update a user.
    pub async fn update(&self, model: user::ActiveModel) -> AppResult<user::Model> {
        model
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Record a successful login.
    pub async fn touch_last_login(&self, user_id: &str, at: DateTime<Utc>) -> AppResult<()> {
        User::update_many()
            .col_expr(user::Column::LastLogin, Expr::value(at))
            .filter(user::Column::Id.eq(user_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Page through users, newest first, optionally filtered by a search term
    /// matched against email and names.
    pub async fn list(
        &self,
        search: Option<&str>,
        limit: u64,
        offset: u64,
    ) -> AppResult<(Vec<user::Model>, u64)> {
        let mut query = User::find();

        if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
            let pattern = format!("%{}%", term.replace('%', "\\%").replace('_', "\\_"));
            query = query.filter(
                Condition::any()
                    .add(user::Column::Email.like(&pattern))
                    .add(user::Column::FirstName.like(&pattern))
                    .add(user::Column::LastName.like(&pattern)),
            );
        }

        let total = query
            .clone()
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let users = query
            .order_by_desc(user::Column::CreatedAt)
            .offset(offset)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok((users, total))
    }

    /// Count users matching a condition.
    async fn count_where(&self, condition: Condition) -> AppResult<u64> {
        User::find()
            .filter(condition)
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Aggregate counts for the admin dashboard.
    pub async fn counts(&self) -> AppResult<UserCounts> {
        Ok(UserCounts {
            total: self.count_where(Condition::all()).await?,
            verified: self
                .count_where(Condition::all().add(user::Column::IsVerified.eq(true)))
                .await?,
            premium: self
                .count_where(Condition::all().add(user::Column::IsPremium.eq(true)))
                .await?,
            banned: self
                .count_where(Condition::all().add(user::Column::IsBanned.eq(true)))
                .await?,
            deleted: self
                .count_where(Condition::all().add(user::Column::IsDeleted.eq(true)))
                .await?,
            students: self
                .count_where(Condition::all().add(user::Column::Role.eq(Role::Student)))
                .await?,
            teachers: self
                .count_where(Condition::all().add(user::Column::Role.eq(Role::Teacher)))
                .await?,
            admins: self
                .count_where(Condition::all().add(user::Column::Role.eq(Role::Admin)))
                .await?,
        })
    }

    /// Count accounts created since `since`.
    pub async fn count_created_since(&self, since: DateTime<Utc>) -> AppResult<u64> {
        self.count_where(Condition::all().add(user::Column::CreatedAt.gte(since)))
            .await
    }

    /// Permanently remove a user and everything that references them.
    pub async fn hard_delete(&self, user_id: &str) -> AppResult<()> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        UserBan::delete_many()
            .filter(user_ban::Column::UserId.eq(user_id))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Subscription::delete_many()
            .filter(subscription::Column::UserId.eq(user_id))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        TestAttempt::delete_many()
            .filter(test_attempt::Column::UserId.eq(user_id))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        UserFavorite::delete_many()
            .filter(user_favorite::Column::UserId.eq(user_id))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        UserAchievement::delete_many()
            .filter(user_achievement::Column::UserId.eq(user_id))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let result = User::delete_by_id(user_id)
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            // Dropping the transaction rolls it back.
            return Err(AppError::UserNotFound(user_id.to_string()));
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Mark a user as deleted without removing the row.
    pub async fn soft_delete(&self, user_id: &str, at: DateTime<Utc>) -> AppResult<user::Model> {
        let user = self.get_by_id(user_id).await?;
        let mut active: user::ActiveModel = user.into();
        active.is_deleted = Set(true);
        active.updated_at = Set(Some(at.into()));
        self.update(active).await
    }
}

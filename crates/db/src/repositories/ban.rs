//! Ban repository.
//!
//! `user_ban` rows are the source of truth. Every write here runs in one
//! transaction that also recomputes the ban snapshot on `user` and toggles
//! the user's subscriptions, so readers never see a half-applied ban.

use std::sync::Arc;

use crate::entities::{Subscription, User, UserBan, subscription, user, user_ban};
use chrono::{DateTime, Utc};
use medlearn_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
    sea_query::Expr,
};

/// Reason recorded when a temporary ban runs out.
pub const AUTO_UNBAN_REASON: &str = "Automatic unban after ban expiry";

/// A ban about to be issued.
#[derive(Debug, Clone)]
pub struct NewBan {
    pub id: String,
    pub user_id: String,
    pub banned_by: String,
    pub reason: String,
    /// `None` for a permanent ban.
    pub banned_until: Option<DateTime<Utc>>,
}

/// How an active ban is being closed.
#[derive(Debug, Clone)]
pub struct BanClosure<'a> {
    /// Moderator lifting the ban; `None` for automatic expiry.
    pub actor_id: Option<&'a str>,
    pub reason: &'a str,
}

/// Ban repository for database operations.
#[derive(Clone)]
pub struct BanRepository {
    db: Arc<DatabaseConnection>,
}

fn db_err(e: DbErr) -> AppError {
    AppError::Database(e.to_string())
}

impl BanRepository {
    /// Create a new ban repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// The user's active ban, if any.
    pub async fn find_active(&self, user_id: &str) -> AppResult<Option<user_ban::Model>> {
        Self::active_for(self.db.as_ref(), user_id)
            .await
            .map_err(db_err)
    }

    /// Every ban ever issued to a user, newest first.
    pub async fn history(&self, user_id: &str) -> AppResult<Vec<user_ban::Model>> {
        UserBan::find()
            .filter(user_ban::Column::UserId.eq(user_id))
            .order_by_desc(user_ban::Column::BannedAt)
            .all(self.db.as_ref())
            .await
            .map_err(db_err)
    }

    /// Users whose temporary ban ran out at or before `now`.
    pub async fn find_expired_user_ids(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> AppResult<Vec<String>> {
        UserBan::find()
            .select_only()
            .column(user_ban::Column::UserId)
            .filter(user_ban::Column::IsActive.eq(true))
            .filter(user_ban::Column::IsPermanent.eq(false))
            .filter(user_ban::Column::BannedUntil.lte(now))
            .order_by_asc(user_ban::Column::BannedUntil)
            .limit(limit)
            .into_tuple::<String>()
            .all(self.db.as_ref())
            .await
            .map_err(db_err)
    }

    /// Issue a ban.
    ///
    /// Locks the user row, refuses a second active ban, inserts the ban,
    /// deactivates all active subscriptions and refreshes the snapshot.
    /// An expired-but-open ban found under the lock is closed first.
    pub async fn ban(&self, new_ban: NewBan, now: DateTime<Utc>) -> AppResult<user::Model> {
        let txn = self.db.begin().await.map_err(db_err)?;

        let target = Self::lock_user(&txn, &new_ban.user_id).await?;

        if let Some(existing) = Self::active_for(&txn, &new_ban.user_id)
            .await
            .map_err(db_err)?
        {
            if !existing.is_expired_at(now.into()) {
                return Err(AppError::BadRequest("User is already banned".to_string()));
            }
            Self::close(
                &txn,
                existing,
                BanClosure {
                    actor_id: None,
                    reason: AUTO_UNBAN_REASON,
                },
                now,
            )
            .await
            .map_err(db_err)?;
        }

        let ban = user_ban::ActiveModel {
            id: Set(new_ban.id),
            user_id: Set(new_ban.user_id.clone()),
            banned_by: Set(new_ban.banned_by),
            ban_reason: Set(new_ban.reason),
            banned_at: Set(now.into()),
            banned_until: Set(new_ban.banned_until.map(Into::into)),
            is_permanent: Set(new_ban.banned_until.is_none()),
            is_active: Set(true),
            unban_reason: Set(None),
            unbanned_at: Set(None),
            unbanned_by: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(db_err)?;

        Subscription::update_many()
            .col_expr(subscription::Column::IsActive, Expr::value(false))
            .filter(subscription::Column::UserId.eq(&new_ban.user_id))
            .filter(subscription::Column::IsActive.eq(true))
            .exec(&txn)
            .await
            .map_err(db_err)?;

        let updated = Self::sync_snapshot(&txn, target, Some(&ban), now)
            .await
            .map_err(db_err)?;

        txn.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    /// Lift the user's active ban.
    ///
    /// Fails with `BadRequest` when there is nothing to lift.
    pub async fn unban(
        &self,
        user_id: &str,
        closure: BanClosure<'_>,
        now: DateTime<Utc>,
    ) -> AppResult<user::Model> {
        let txn = self.db.begin().await.map_err(db_err)?;

        let target = Self::lock_user(&txn, user_id).await?;
        let Some(active) = Self::active_for(&txn, user_id).await.map_err(db_err)? else {
            return Err(AppError::BadRequest("User is not banned".to_string()));
        };

        let updated = Self::close_and_restore(&txn, target, active, closure, now)
            .await
            .map_err(db_err)?;

        txn.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    /// Close the user's ban if it has run out by `now`.
    ///
    /// Returns the refreshed user when a ban was closed, `None` when there was
    /// nothing to do (no active ban, or it is still running). Safe to call
    /// concurrently: the row lock makes the second caller see no active ban.
    pub async fn expire(&self, user_id: &str, now: DateTime<Utc>) -> AppResult<Option<user::Model>> {
        let txn = self.db.begin().await.map_err(db_err)?;

        let target = Self::lock_user(&txn, user_id).await?;
        let active = Self::active_for(&txn, user_id).await.map_err(db_err)?;

        let Some(active) = active.filter(|ban| ban.is_expired_at(now.into())) else {
            txn.rollback().await.map_err(db_err)?;
            return Ok(None);
        };

        let updated = Self::close_and_restore(
            &txn,
            target,
            active,
            BanClosure {
                actor_id: None,
                reason: AUTO_UNBAN_REASON,
            },
            now,
        )
        .await
        .map_err(db_err)?;

        txn.commit().await.map_err(db_err)?;
        Ok(Some(updated))
    }

    // ==================== transaction helpers ====================

    async fn lock_user(txn: &DatabaseTransaction, user_id: &str) -> AppResult<user::Model> {
        User::find_by_id(user_id)
            .lock_exclusive()
            .one(txn)
            .await
            .map_err(db_err)?
            .ok_or_else(|| AppError::UserNotFound(user_id.to_string()))
    }

    async fn active_for<C: ConnectionTrait>(
        conn: &C,
        user_id: &str,
    ) -> Result<Option<user_ban::Model>, DbErr> {
        UserBan::find()
            .filter(user_ban::Column::UserId.eq(user_id))
            .filter(user_ban::Column::IsActive.eq(true))
            .one(conn)
            .await
    }

    async fn close(
        txn: &DatabaseTransaction,
        ban: user_ban::Model,
        closure: BanClosure<'_>,
        now: DateTime<Utc>,
    ) -> Result<user_ban::Model, DbErr> {
        let mut active: user_ban::ActiveModel = ban.into();
        active.is_active = Set(false);
        active.unban_reason = Set(Some(closure.reason.to_string()));
        active.unbanned_at = Set(Some(now.into()));
        active.unbanned_by = Set(closure.actor_id.map(str::to_string));
        active.update(txn).await
    }

    /// Close `ban`, reactivate still-running subscriptions and clear the snapshot.
    async fn close_and_restore(
        txn: &DatabaseTransaction,
        target: user::Model,
        ban: user_ban::Model,
        closure: BanClosure<'_>,
        now: DateTime<Utc>,
    ) -> Result<user::Model, DbErr> {
        Self::close(txn, ban, closure, now).await?;

        Subscription::update_many()
            .col_expr(subscription::Column::IsActive, Expr::value(true))
            .filter(subscription::Column::UserId.eq(&target.id))
            .filter(subscription::Column::IsActive.eq(false))
            .filter(subscription::Column::EndDate.gt(now))
            .exec(txn)
            .await?;

        Self::sync_snapshot(txn, target, None, now).await
    }

    /// Rewrite the user's ban snapshot from `active` (or clear it).
    async fn sync_snapshot(
        txn: &DatabaseTransaction,
        target: user::Model,
        active: Option<&user_ban::Model>,
        now: DateTime<Utc>,
    ) -> Result<user::Model, DbErr> {
        let mut model: user::ActiveModel = target.into();
        model.is_banned = Set(active.is_some());
        model.ban_reason = Set(active.map(|b| b.ban_reason.clone()));
        model.banned_at = Set(active.map(|b| b.banned_at));
        model.banned_until = Set(active.and_then(|b| b.banned_until));
        model.banned_by = Set(active.map(|b| b.banned_by.clone()));
        model.updated_at = Set(Some(now.into()));
        model.update(txn).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures;
    use chrono::Duration;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn exec(rows: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: rows,
        }
    }

    fn new_ban(hours: Option<i64>, now: DateTime<Utc>) -> NewBan {
        NewBan {
            id: "ban1".to_string(),
            user_id: "u1".to_string(),
            banned_by: "admin".to_string(),
            reason: "spam".to_string(),
            banned_until: hours.map(|h| now + Duration::hours(h)),
        }
    }

    #[tokio::test]
    async fn test_ban_writes_ban_and_snapshot() {
        let now = Utc::now();
        let user = fixtures::user("u1", "u1@example.com");
        let ban = fixtures::active_ban("ban1", "u1", "admin", now, Some(1));
        let banned = fixtures::banned_user("u1", &ban);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                // SELECT ... FOR UPDATE
                .append_query_results([[user]])
                // no active ban
                .append_query_results([Vec::<user_ban::Model>::new()])
                // INSERT ... RETURNING
                .append_query_results([[ban.clone()]])
                // UPDATE user ... RETURNING
                .append_query_results([[banned.clone()]])
                // deactivate subscriptions
                .append_exec_results([exec(2)])
                .into_connection(),
        );

        let repo = BanRepository::new(db);
        let updated = repo.ban(new_ban(Some(1), now), now).await.unwrap();
        assert!(updated.is_banned);
        assert_eq!(updated.banned_until, ban.banned_until);
    }

    #[tokio::test]
    async fn test_ban_rejects_second_active_ban() {
        let now = Utc::now();
        let existing = fixtures::active_ban("ban0", "u1", "admin", now, None);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[fixtures::banned_user("u1", &existing)]])
                .append_query_results([[existing]])
                .into_connection(),
        );

        let repo = BanRepository::new(db);
        match repo.ban(new_ban(None, now), now).await {
            Err(AppError::BadRequest(msg)) => assert!(msg.contains("already banned")),
            other => panic!("Expected BadRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ban_unknown_user() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<user::Model>::new()])
                .into_connection(),
        );

        let repo = BanRepository::new(db);
        assert!(matches!(
            repo.ban(new_ban(None, Utc::now()), Utc::now()).await,
            Err(AppError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unban_without_active_ban() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[fixtures::user("u1", "u1@example.com")]])
                .append_query_results([Vec::<user_ban::Model>::new()])
                .into_connection(),
        );

        let repo = BanRepository::new(db);
        let closure = BanClosure {
            actor_id: Some("admin"),
            reason: "appeal",
        };
        match repo.unban("u1", closure, Utc::now()).await {
            Err(AppError::BadRequest(msg)) => assert_eq!(msg, "User is not banned"),
            other => panic!("Expected BadRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expire_closes_ran_out_ban() {
        let banned_at = Utc::now() - Duration::hours(2);
        let now = Utc::now();
        let ban = fixtures::active_ban("ban1", "u1", "admin", banned_at, Some(1));
        let mut closed = ban.clone();
        closed.is_active = false;
        closed.unban_reason = Some(AUTO_UNBAN_REASON.to_string());
        closed.unbanned_at = Some(now.into());

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[fixtures::banned_user("u1", &ban)]])
                .append_query_results([[ban]])
                // UPDATE user_ban ... RETURNING
                .append_query_results([[closed]])
                // UPDATE user ... RETURNING
                .append_query_results([[fixtures::user("u1", "u1@example.com")]])
                // reactivate subscriptions
                .append_exec_results([exec(1)])
                .into_connection(),
        );

        let repo = BanRepository::new(db);
        let updated = repo.expire("u1", now).await.unwrap().unwrap();
        assert!(!updated.is_banned);
        assert!(updated.ban_reason.is_none());
    }

    #[tokio::test]
    async fn test_expire_leaves_running_ban_alone() {
        let now = Utc::now();
        let ban = fixtures::active_ban("ban1", "u1", "admin", now, Some(1));

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[fixtures::banned_user("u1", &ban)]])
                .append_query_results([[ban]])
                .into_connection(),
        );

        let repo = BanRepository::new(db);
        assert!(repo.expire("u1", now).await.unwrap().is_none());
    }

    /// The reactivation `UPDATE` must only touch subscriptions still running.
    const FUTURE_END_FILTER: &str = r#"\"subscription\".\"end_date\" > $"#;

    fn transaction_log(db: Arc<DatabaseConnection>) -> String {
        let Ok(db) = Arc::try_unwrap(db) else {
            panic!("connection still shared");
        };
        format!("{:?}", db.into_transaction_log())
    }

    #[tokio::test]
    async fn test_unban_reactivates_only_running_subscriptions() {
        let now = Utc::now();
        let ban = fixtures::active_ban("ban1", "u1", "admin", now, None);
        let mut closed = ban.clone();
        closed.is_active = false;

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[fixtures::banned_user("u1", &ban)]])
                .append_query_results([[ban]])
                .append_query_results([[closed]])
                .append_query_results([[fixtures::user("u1", "u1@example.com")]])
                .append_exec_results([exec(1)])
                .into_connection(),
        );

        let repo = BanRepository::new(db.clone());
        let closure = BanClosure {
            actor_id: Some("admin"),
            reason: "appeal",
        };
        let updated = repo.unban("u1", closure, now).await.unwrap();
        assert!(!updated.is_banned);
        drop(repo);

        let log = transaction_log(db);
        assert!(log.contains(FUTURE_END_FILTER), "{log}");
    }

    #[tokio::test]
    async fn test_expiry_reactivates_only_running_subscriptions() {
        let banned_at = Utc::now() - Duration::hours(2);
        let now = Utc::now();
        let ban = fixtures::active_ban("ban1", "u1", "admin", banned_at, Some(1));
        let mut closed = ban.clone();
        closed.is_active = false;

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[fixtures::banned_user("u1", &ban)]])
                .append_query_results([[ban]])
                .append_query_results([[closed]])
                .append_query_results([[fixtures::user("u1", "u1@example.com")]])
                .append_exec_results([exec(0)])
                .into_connection(),
        );

        let repo = BanRepository::new(db.clone());
        assert!(repo.expire("u1", now).await.unwrap().is_some());
        drop(repo);

        let log = transaction_log(db);
        assert!(log.contains(FUTURE_END_FILTER), "{log}");
    }

    #[tokio::test]
    async fn test_ban_deactivates_regardless_of_end_date() {
        let now = Utc::now();
        let ban = fixtures::active_ban("ban1", "u1", "admin", now, Some(1));

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[fixtures::user("u1", "u1@example.com")]])
                .append_query_results([Vec::<user_ban::Model>::new()])
                .append_query_results([[ban.clone()]])
                .append_query_results([[fixtures::banned_user("u1", &ban)]])
                .append_exec_results([exec(2)])
                .into_connection(),
        );

        let repo = BanRepository::new(db.clone());
        repo.ban(new_ban(Some(1), now), now).await.unwrap();
        drop(repo);

        let log = transaction_log(db);
        assert!(!log.contains(FUTURE_END_FILTER), "{log}");
    }

    #[test]
    fn test_permanent_ban_never_expires() {
        let ban = fixtures::active_ban("b", "u", "a", Utc::now() - Duration::days(400), None);
        assert!(!ban.is_expired_at(Utc::now().into()));
    }
}

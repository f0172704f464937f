//! Ban and session-validity service.
//!
//! Decides whether a user may act right now. A temporary ban whose end has
//! passed is closed on the spot (lazy expiry), so the request that notices it
//! goes through as if the ban had already been lifted. The periodic sweep in
//! [`BanService::auto_expire_sweep`] does the same for users who never come back.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use medlearn_common::{AppError, AppResult, IdGenerator, Metrics};
use medlearn_db::{
    entities::{user, user_ban},
    repositories::{BanClosure, BanRepository, NewBan, UserRepository},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

/// Users closed per sweep batch.
const SWEEP_BATCH: u64 = 100;

/// Metadata of an active ban, as shown to the banned user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BanDetails {
    pub reason: String,
    pub banned_at: DateTime<Utc>,
    pub is_permanent: bool,
    pub banned_until: Option<DateTime<Utc>>,
    /// Milliseconds until a temporary ban ends.
    pub time_left_ms: Option<i64>,
}

impl BanDetails {
    fn from_ban(ban: &user_ban::Model, now: DateTime<Utc>) -> Self {
        let banned_until = ban
            .banned_until
            .filter(|_| !ban.is_permanent)
            .map(|t| t.with_timezone(&Utc));
        Self {
            reason: ban.ban_reason.clone(),
            banned_at: ban.banned_at.with_timezone(&Utc),
            is_permanent: ban.is_permanent,
            banned_until,
            time_left_ms: banned_until.map(|until| (until - now).num_milliseconds().max(0)),
        }
    }
}

/// Why access was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    Banned(BanDetails),
    Deleted,
}

/// Outcome of an access check.
#[derive(Debug, Clone)]
pub enum AccessDecision {
    Allow {
        user: user::Model,
        /// An expired ban was closed during this check.
        ban_lifted: bool,
    },
    Deny(DenyReason),
}

impl AccessDecision {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// Input for banning a user.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BanInput {
    #[validate(length(min = 1, max = 1000))]
    pub reason: String,
    /// `None` bans permanently.
    pub duration_hours: Option<i64>,
}

/// Ban and session-validity service.
#[derive(Clone)]
pub struct BanService {
    ban_repo: BanRepository,
    user_repo: UserRepository,
    metrics: Arc<Metrics>,
    id_gen: IdGenerator,
}

impl BanService {
    #[must_use]
    pub const fn new(
        ban_repo: BanRepository,
        user_repo: UserRepository,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            ban_repo,
            user_repo,
            metrics,
            id_gen: IdGenerator::new(),
        }
    }

    /// Decide whether `user_id` may act now.
    pub async fn check_access(&self, user_id: &str) -> AppResult<AccessDecision> {
        self.check_access_at(user_id, Utc::now()).await
    }

    /// [`Self::check_access`] with an explicit clock.
    pub async fn check_access_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<AccessDecision> {
        let user = self.user_repo.get_by_id(user_id).await?;
        self.decide(user, now).await
    }

    /// Login-time check. `None` when the email is unknown or the user may log in.
    pub async fn check_access_by_email(&self, email: &str) -> AppResult<Option<DenyReason>> {
        self.check_access_by_email_at(email, Utc::now()).await
    }

    /// [`Self::check_access_by_email`] with an explicit clock.
    pub async fn check_access_by_email_at(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<DenyReason>> {
        let Some(user) = self.user_repo.find_by_email(email).await? else {
            return Ok(None);
        };

        Ok(match self.decide(user, now).await? {
            AccessDecision::Allow { .. } => None,
            AccessDecision::Deny(reason) => Some(reason),
        })
    }

    async fn decide(&self, user: user::Model, now: DateTime<Utc>) -> AppResult<AccessDecision> {
        if user.is_deleted {
            return Ok(AccessDecision::Deny(DenyReason::Deleted));
        }

        let Some(ban) = self.ban_repo.find_active(&user.id).await? else {
            return Ok(AccessDecision::Allow {
                user,
                ban_lifted: false,
            });
        };

        if !ban.is_expired_at(now.into()) {
            return Ok(AccessDecision::Deny(DenyReason::Banned(BanDetails::from_ban(
                &ban, now,
            ))));
        }

        match self.ban_repo.expire(&user.id, now).await? {
            Some(updated) => {
                self.metrics.record_bans_expired(1);
                info!(user_id = %updated.id, ban_id = %ban.id, "Expired ban lifted");
                Ok(AccessDecision::Allow {
                    user: updated,
                    ban_lifted: true,
                })
            }
            // Closed concurrently by another request or the sweep.
            None => Ok(AccessDecision::Allow {
                user: self.user_repo.get_by_id(&user.id).await?,
                ban_lifted: false,
            }),
        }
    }

    /// Ban `user_id`, permanently unless a duration is given.
    pub async fn ban(
        &self,
        actor_id: &str,
        user_id: &str,
        input: BanInput,
    ) -> AppResult<user::Model> {
        self.ban_at(actor_id, user_id, input, Utc::now()).await
    }

    /// [`Self::ban`] with an explicit clock.
    pub async fn ban_at(
        &self,
        actor_id: &str,
        user_id: &str,
        input: BanInput,
        now: DateTime<Utc>,
    ) -> AppResult<user::Model> {
        if actor_id == user_id {
            return Err(AppError::BadRequest("Cannot ban yourself".to_string()));
        }

        let reason = input.reason.trim().to_string();
        if reason.is_empty() {
            return Err(AppError::Validation("Ban reason is required".to_string()));
        }
        input.validate()?;

        let banned_until = match input.duration_hours {
            Some(hours) if hours <= 0 => {
                return Err(AppError::BadRequest(
                    "Ban duration must be a positive number of hours".to_string(),
                ));
            }
            Some(hours) => Some(
                Duration::try_hours(hours)
                    .and_then(|d| now.checked_add_signed(d))
                    .ok_or_else(|| {
                        AppError::BadRequest("Ban duration is out of range".to_string())
                    })?,
            ),
            None => None,
        };

        let user = self
            .ban_repo
            .ban(
                NewBan {
                    id: self.id_gen.generate(),
                    user_id: user_id.to_string(),
                    banned_by: actor_id.to_string(),
                    reason,
                    banned_until,
                },
                now,
            )
            .await?;

        self.metrics.record_ban_issued();
        info!(
            user_id = %user_id,
            actor_id = %actor_id,
            permanent = banned_until.is_none(),
            "User banned"
        );
        Ok(user)
    }

    /// Lift the active ban on `user_id`.
    pub async fn unban(
        &self,
        actor_id: &str,
        user_id: &str,
        reason: Option<&str>,
    ) -> AppResult<user::Model> {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or("Unbanned by moderator");

        let user = self
            .ban_repo
            .unban(
                user_id,
                BanClosure {
                    actor_id: Some(actor_id),
                    reason,
                },
                Utc::now(),
            )
            .await?;

        self.metrics.record_ban_lifted();
        info!(user_id = %user_id, actor_id = %actor_id, "User unbanned");
        Ok(user)
    }

    /// Ban history of a user, newest first.
    pub async fn history(&self, user_id: &str) -> AppResult<Vec<user_ban::Model>> {
        self.user_repo.get_by_id(user_id).await?;
        self.ban_repo.history(user_id).await
    }

    /// Close every temporary ban that ended by now.
    pub async fn auto_expire_sweep(&self) -> AppResult<u64> {
        self.auto_expire_sweep_at(Utc::now()).await
    }

    /// [`Self::auto_expire_sweep`] with an explicit clock. Returns how many users were unbanned.
    pub async fn auto_expire_sweep_at(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut lifted = 0_u64;

        loop {
            let user_ids = self
                .ban_repo
                .find_expired_user_ids(now, SWEEP_BATCH)
                .await?;
            let batch_len = user_ids.len() as u64;
            let mut progressed = false;

            for user_id in user_ids {
                match self.ban_repo.expire(&user_id, now).await {
                    Ok(Some(_)) => {
                        lifted += 1;
                        progressed = true;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // Left active; the next sweep or access check retries it.
                        warn!(user_id = %user_id, error = %e, "Failed to lift expired ban");
                    }
                }
            }

            if batch_len < SWEEP_BATCH || !progressed {
                break;
            }
        }

        if lifted > 0 {
            self.metrics.record_bans_expired(lifted);
        }
        Ok(lifted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use medlearn_db::test_utils::fixtures;
    use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase, MockExecResult};

    fn service(db: DatabaseConnection) -> (BanService, Arc<Metrics>) {
        let db = Arc::new(db);
        let metrics = Arc::new(Metrics::new());
        (
            BanService::new(
                BanRepository::new(db.clone()),
                UserRepository::new(db),
                metrics.clone(),
            ),
            metrics,
        )
    }

    fn exec(rows: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: rows,
        }
    }

    #[tokio::test]
    async fn test_active_ban_denies_with_time_left() {
        let now = Utc::now();
        let ban = fixtures::active_ban("b1", "u1", "admin", now, Some(1));
        let user = fixtures::banned_user("u1", &ban);

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[user]])
            .append_query_results([[ban]])
            .into_connection();
        let (service, _) = service(db);

        match service.check_access_at("u1", now).await.unwrap() {
            AccessDecision::Deny(DenyReason::Banned(details)) => {
                assert_eq!(details.reason, "spam");
                assert!(!details.is_permanent);
                assert_eq!(details.time_left_ms, Some(3_600_000));
            }
            other => panic!("Expected ban denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_permanent_ban_has_no_time_left() {
        let now = Utc::now();
        let ban = fixtures::active_ban("b1", "u1", "admin", now, None);
        let user = fixtures::banned_user("u1", &ban);

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[user]])
            .append_query_results([[ban]])
            .into_connection();
        let (service, _) = service(db);

        let far_future = now + Duration::days(3650);
        match service.check_access_at("u1", far_future).await.unwrap() {
            AccessDecision::Deny(DenyReason::Banned(details)) => {
                assert!(details.is_permanent);
                assert!(details.banned_until.is_none());
                assert!(details.time_left_ms.is_none());
            }
            other => panic!("Expected ban denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expired_ban_is_lifted_during_check() {
        let banned_at = Utc::now();
        let ban = fixtures::active_ban("b1", "u1", "admin", banned_at, Some(1));
        let banned = fixtures::banned_user("u1", &ban);
        let cleared = fixtures::user("u1", "u1@example.com");
        let later = banned_at + Duration::hours(2);

        let mut closed = ban.clone();
        closed.is_active = false;

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // check: user, active ban
            .append_query_results([[banned.clone()]])
            .append_query_results([[ban.clone()]])
            // expire: locked user, active ban, closed ban, cleared user
            .append_query_results([[banned]])
            .append_query_results([[ban]])
            .append_query_results([[closed]])
            .append_query_results([[cleared]])
            // reactivated subscriptions
            .append_exec_results([exec(1)])
            .into_connection();
        let (service, metrics) = service(db);

        match service.check_access_at("u1", later).await.unwrap() {
            AccessDecision::Allow { user, ban_lifted } => {
                assert!(ban_lifted);
                assert!(!user.is_banned);
            }
            other => panic!("Expected allow, got {other:?}"),
        }
        assert_eq!(metrics.snapshot().bans_expired, 1);
    }

    #[tokio::test]
    async fn test_second_check_after_expiry_is_plain_allow() {
        let banned_at = Utc::now();
        let ban = fixtures::active_ban("b1", "u1", "admin", banned_at, Some(1));
        let banned = fixtures::banned_user("u1", &ban);
        let cleared = fixtures::user("u1", "u1@example.com");
        let later = banned_at + Duration::hours(2);

        let mut closed = ban.clone();
        closed.is_active = false;

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // first check lifts the ban
            .append_query_results([[banned.clone()]])
            .append_query_results([[ban.clone()]])
            .append_query_results([[banned]])
            .append_query_results([[ban]])
            .append_query_results([[closed]])
            .append_query_results([[cleared.clone()]])
            .append_exec_results([exec(1)])
            // second check: no active ban left
            .append_query_results([[cleared]])
            .append_query_results([Vec::<user_ban::Model>::new()])
            .into_connection();
        let (service, metrics) = service(db);

        let first = service.check_access_at("u1", later).await.unwrap();
        assert!(matches!(first, AccessDecision::Allow { ban_lifted: true, .. }));

        match service.check_access_at("u1", later).await.unwrap() {
            AccessDecision::Allow { user, ban_lifted } => {
                assert!(!ban_lifted);
                assert!(!user.is_banned);
            }
            other => panic!("Expected allow, got {other:?}"),
        }
        assert_eq!(metrics.snapshot().bans_expired, 1);
    }

    #[tokio::test]
    async fn test_ban_closed_concurrently_still_allows() {
        let banned_at = Utc::now();
        let ban = fixtures::active_ban("b1", "u1", "admin", banned_at, Some(1));
        let banned = fixtures::banned_user("u1", &ban);
        let cleared = fixtures::user("u1", "u1@example.com");
        let later = banned_at + Duration::hours(2);

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // check sees the stale ban
            .append_query_results([[banned.clone()]])
            .append_query_results([[ban]])
            // expire: the lock holder already closed it
            .append_query_results([[cleared.clone()]])
            .append_query_results([Vec::<user_ban::Model>::new()])
            // refreshed user
            .append_query_results([[cleared]])
            .into_connection();
        let (service, metrics) = service(db);

        match service.check_access_at("u1", later).await.unwrap() {
            AccessDecision::Allow { user, ban_lifted } => {
                assert!(!ban_lifted);
                assert!(!user.is_banned);
            }
            other => panic!("Expected allow, got {other:?}"),
        }
        assert_eq!(metrics.snapshot().bans_expired, 0);
    }

    #[tokio::test]
    async fn test_deleted_user_denied_before_ban_lookup() {
        let mut user = fixtures::user("u1", "u1@example.com");
        user.is_deleted = true;

        // No ban query queued: the check must short-circuit.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[user]])
            .into_connection();
        let (service, _) = service(db);

        let decision = service.check_access("u1").await.unwrap();
        assert!(matches!(decision, AccessDecision::Deny(DenyReason::Deleted)));
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<user::Model>::new()])
            .into_connection();
        let (service, _) = service(db);

        assert!(matches!(
            service.check_access("ghost").await,
            Err(AppError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_check_by_unknown_email_is_none() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<user::Model>::new()])
            .into_connection();
        let (service, _) = service(db);

        assert!(
            service
                .check_access_by_email("nobody@example.com")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_check_failure_propagates() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_errors([sea_orm::DbErr::Custom("connection reset".to_string())])
            .into_connection();
        let (service, _) = service(db);

        let err = service.check_access("u1").await.unwrap_err();
        assert!(err.is_server_error());
    }

    #[tokio::test]
    async fn test_self_ban_rejected_without_queries() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let (service, metrics) = service(db);

        let result = service
            .ban(
                "u1",
                "u1",
                BanInput {
                    reason: "test".to_string(),
                    duration_hours: None,
                },
            )
            .await;

        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(metrics.snapshot().bans_issued, 0);
    }

    #[tokio::test]
    async fn test_ban_requires_reason_and_positive_duration() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let (service, _) = service(db);

        let blank = service
            .ban(
                "admin",
                "u1",
                BanInput {
                    reason: "   ".to_string(),
                    duration_hours: Some(1),
                },
            )
            .await;
        assert!(matches!(blank, Err(AppError::Validation(_))));

        let zero = service
            .ban(
                "admin",
                "u1",
                BanInput {
                    reason: "spam".to_string(),
                    duration_hours: Some(0),
                },
            )
            .await;
        assert!(matches!(zero, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_ban_duration_out_of_range_is_rejected() {
        // No queries queued: the duration is refused before any write.
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let (service, metrics) = service(db);

        for hours in [1_000_000_000_000, i64::MAX] {
            let result = service
                .ban(
                    "admin",
                    "u1",
                    BanInput {
                        reason: "spam".to_string(),
                        duration_hours: Some(hours),
                    },
                )
                .await;
            assert!(matches!(result, Err(AppError::BadRequest(_))));
        }
        assert_eq!(metrics.snapshot().bans_issued, 0);
    }

    #[tokio::test]
    async fn test_ban_records_metric() {
        let now = Utc::now();
        let target = fixtures::user("u1", "u1@example.com");
        let ban = fixtures::active_ban("b1", "u1", "admin", now, Some(1));
        let banned = fixtures::banned_user("u1", &ban);

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[target]])
            .append_query_results([Vec::<user_ban::Model>::new()])
            .append_query_results([[ban]])
            .append_query_results([[banned]])
            .append_exec_results([exec(0)])
            .into_connection();
        let (service, metrics) = service(db);

        let user = service
            .ban_at(
                "admin",
                "u1",
                BanInput {
                    reason: "spam".to_string(),
                    duration_hours: Some(1),
                },
                now,
            )
            .await
            .unwrap();

        assert!(user.is_banned);
        assert_eq!(metrics.snapshot().bans_issued, 1);
    }

    #[tokio::test]
    async fn test_sweep_with_nothing_expired() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<user_ban::Model>::new()])
            .into_connection();
        let (service, _) = service(db);

        assert_eq!(service.auto_expire_sweep().await.unwrap(), 0);
    }
}

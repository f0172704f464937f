//! Administrative user management and dashboard figures.

use std::collections::HashMap;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use medlearn_common::{AppError, AppResult};
use medlearn_db::{
    entities::user::{self, Role},
    repositories::{QuizRepository, ResourceRepository, SubscriptionRepository, UserCounts, UserRepository},
};
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use tracing::info;

const MAX_PAGE_SIZE: u64 = 100;

/// A user row as listed in the admin panel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserView {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub is_verified: bool,
    pub is_premium: bool,
    pub is_deleted: bool,
    pub is_banned: bool,
    pub ban_reason: Option<String>,
    pub banned_at: Option<DateTime<FixedOffset>>,
    pub banned_until: Option<DateTime<FixedOffset>>,
    pub last_login: Option<DateTime<FixedOffset>>,
    pub created_at: DateTime<FixedOffset>,
}

impl From<user::Model> for AdminUserView {
    fn from(u: user::Model) -> Self {
        Self {
            id: u.id,
            email: u.email,
            first_name: u.first_name,
            last_name: u.last_name,
            role: u.role,
            is_verified: u.is_verified,
            is_premium: u.is_premium,
            is_deleted: u.is_deleted,
            is_banned: u.is_banned,
            ban_reason: u.ban_reason,
            banned_at: u.banned_at,
            banned_until: u.banned_until,
            last_login: u.last_login,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPage {
    pub users: Vec<AdminUserView>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersStats {
    pub total: u64,
    pub verified: u64,
    pub premium: u64,
    pub banned: u64,
    pub deleted: u64,
    pub by_role: RoleCounts,
    pub new_last_week: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleCounts {
    pub student: u64,
    pub teacher: u64,
    pub admin: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_users: u64,
    pub premium_users: u64,
    pub banned_users: u64,
    pub total_tests: u64,
    pub total_attempts: u64,
    pub attempts_today: u64,
    pub total_resources: u64,
    pub active_subscriptions: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub attempt_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub test_id: String,
    pub test_title: Option<String>,
    pub percentage: f64,
    pub completed_at: DateTime<FixedOffset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPremiumInput {
    pub is_premium: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleInput {
    pub role: Role,
}

#[derive(Clone)]
pub struct AdminService {
    user_repo: UserRepository,
    quiz_repo: QuizRepository,
    resource_repo: ResourceRepository,
    subscription_repo: SubscriptionRepository,
}

impl AdminService {
    #[must_use]
    pub const fn new(
        user_repo: UserRepository,
        quiz_repo: QuizRepository,
        resource_repo: ResourceRepository,
        subscription_repo: SubscriptionRepository,
    ) -> Self {
        Self {
            user_repo,
            quiz_repo,
            resource_repo,
            subscription_repo,
        }
    }

    /// One page of users. `page` starts at 1.
    pub async fn list_users(&self, page: u64, limit: u64, search: Option<&str>) -> AppResult<UserPage> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let (users, total) = self
            .user_repo
            .list(search, limit, (page - 1) * limit)
            .await?;

        Ok(UserPage {
            users: users.into_iter().map(AdminUserView::from).collect(),
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        })
    }

    pub async fn set_premium(&self, user_id: &str, input: SetPremiumInput) -> AppResult<AdminUserView> {
        let user = self.user_repo.get_by_id(user_id).await?;
        let mut active: user::ActiveModel = user.into();
        active.is_premium = Set(input.is_premium);
        active.updated_at = Set(Some(Utc::now().into()));

        let updated = self.user_repo.update(active).await?;
        info!(user_id = %user_id, is_premium = input.is_premium, "Premium flag changed");
        Ok(updated.into())
    }

    /// Change a user's role. Admins cannot demote themselves.
    pub async fn set_role(
        &self,
        actor: &user::Model,
        user_id: &str,
        input: SetRoleInput,
    ) -> AppResult<AdminUserView> {
        if actor.id == user_id && input.role != Role::Admin {
            return Err(AppError::BadRequest(
                "You cannot remove your own admin role".to_string(),
            ));
        }

        let user = self.user_repo.get_by_id(user_id).await?;
        let previous = user.role;
        let mut active: user::ActiveModel = user.into();
        active.role = Set(input.role);
        active.updated_at = Set(Some(Utc::now().into()));

        let updated = self.user_repo.update(active).await?;
        info!(
            user_id = %user_id,
            actor_id = %actor.id,
            from = previous.as_str(),
            to = input.role.as_str(),
            "Role changed"
        );
        Ok(updated.into())
    }

    /// Remove a user and all their records.
    pub async fn delete_user(&self, actor: &user::Model, user_id: &str) -> AppResult<()> {
        if actor.id == user_id {
            return Err(AppError::BadRequest(
                "You cannot delete your own account here".to_string(),
            ));
        }
        self.user_repo.hard_delete(user_id).await?;
        info!(user_id = %user_id, actor_id = %actor.id, "User hard-deleted");
        Ok(())
    }

    pub async fn users_stats(&self) -> AppResult<UsersStats> {
        let UserCounts {
            total,
            verified,
            premium,
            banned,
            deleted,
            students,
            teachers,
            admins,
        } = self.user_repo.counts().await?;
        let new_last_week = self
            .user_repo
            .count_created_since(Utc::now() - Duration::days(7))
            .await?;

        Ok(UsersStats {
            total,
            verified,
            premium,
            banned,
            deleted,
            by_role: RoleCounts {
                student: students,
                teacher: teachers,
                admin: admins,
            },
            new_last_week,
        })
    }

    pub async fn dashboard(&self) -> AppResult<DashboardStats> {
        let counts = self.user_repo.counts().await?;
        let today = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map_or_else(Utc::now, |midnight| midnight.and_utc());

        Ok(DashboardStats {
            total_users: counts.total,
            premium_users: counts.premium,
            banned_users: counts.banned,
            total_tests: self.quiz_repo.count_tests().await?,
            total_attempts: self.quiz_repo.count_attempts().await?,
            attempts_today: self.quiz_repo.count_attempts_since(today).await?,
            total_resources: self.resource_repo.count_published().await?,
            active_subscriptions: self.subscription_repo.count_active().await?,
        })
    }

    /// Latest quiz attempts across all users.
    pub async fn activity(&self, limit: u64, offset: u64) -> AppResult<Vec<ActivityEntry>> {
        let attempts = self
            .quiz_repo
            .recent_attempts(limit.clamp(1, MAX_PAGE_SIZE), offset)
            .await?;

        let mut user_ids: Vec<String> = attempts.iter().map(|(a, _)| a.user_id.clone()).collect();
        user_ids.sort_unstable();
        user_ids.dedup();
        let names: HashMap<String, String> = self
            .user_repo
            .find_many(user_ids)
            .await?
            .into_iter()
            .map(|u| (u.id, format!("{} {}", u.first_name, u.last_name)))
            .collect();

        Ok(attempts
            .into_iter()
            .map(|(attempt, test)| ActivityEntry {
                user_name: names.get(&attempt.user_id).cloned(),
                test_title: test.map(|t| t.title),
                attempt_id: attempt.id,
                user_id: attempt.user_id,
                test_id: attempt.test_id,
                percentage: attempt.percentage,
                completed_at: attempt.completed_at,
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use medlearn_db::test_utils::fixtures;
    use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase, Value};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn service(db: DatabaseConnection) -> AdminService {
        let db = Arc::new(db);
        AdminService::new(
            UserRepository::new(db.clone()),
            QuizRepository::new(db.clone()),
            ResourceRepository::new(db.clone()),
            SubscriptionRepository::new(db),
        )
    }

    fn count_row(n: i64) -> BTreeMap<String, Value> {
        BTreeMap::from([("num_items".to_string(), Value::BigInt(Some(n)))])
    }

    #[tokio::test]
    async fn test_admin_cannot_demote_self() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let admin = fixtures::user_with_role("a1", Role::Admin);

        let result = service(db)
            .set_role(&admin, "a1", SetRoleInput { role: Role::Teacher })
            .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_admin_cannot_hard_delete_self() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let admin = fixtures::user_with_role("a1", Role::Admin);

        assert!(matches!(
            service(db).delete_user(&admin, "a1").await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_promote_other_user() {
        let target = fixtures::user("u1", "anna@example.com");
        let promoted = user::Model {
            role: Role::Teacher,
            ..target.clone()
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[target]])
            .append_query_results([[promoted]])
            .into_connection();
        let admin = fixtures::user_with_role("a1", Role::Admin);

        let view = service(db)
            .set_role(&admin, "u1", SetRoleInput { role: Role::Teacher })
            .await
            .unwrap();
        assert_eq!(view.role, Role::Teacher);
    }

    #[tokio::test]
    async fn test_list_users_pages() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[count_row(45)]])
            .append_query_results([[fixtures::user("u1", "anna@example.com")]])
            .into_connection();

        let page = service(db).list_users(0, 20, None).await.unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.users.len(), 1);
    }

    #[test]
    fn test_role_input_lowercase() {
        let input: SetRoleInput = serde_json::from_str(r#"{"role":"teacher"}"#).unwrap();
        assert_eq!(input.role, Role::Teacher);
        assert!(serde_json::from_str::<SetRoleInput>(r#"{"role":"root"}"#).is_err());
    }
}

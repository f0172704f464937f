//! Account self-service: profile, settings, password and deletion.

use chrono::{DateTime, FixedOffset, Utc};
use medlearn_common::{AppError, AppResult};
use medlearn_db::{
    entities::user::{self, Role},
    repositories::UserRepository,
};
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use super::auth::{NAME_RE, hash_password, verify_password};

/// What a user sees about themself.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub university: Option<String>,
    pub course: Option<String>,
    pub role: Role,
    pub is_verified: bool,
    pub is_premium: bool,
    pub email_notifications: bool,
    pub study_reminders: bool,
    pub created_at: DateTime<FixedOffset>,
}

impl From<user::Model> for Profile {
    fn from(u: user::Model) -> Self {
        Self {
            id: u.id,
            email: u.email,
            first_name: u.first_name,
            last_name: u.last_name,
            university: u.university,
            course: u.course,
            role: u.role,
            is_verified: u.is_verified,
            is_premium: u.is_premium,
            email_notifications: u.email_notifications,
            study_reminders: u.study_reminders,
            created_at: u.created_at,
        }
    }
}

/// Short form returned on login.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub is_premium: bool,
}

impl From<user::Model> for UserSummary {
    fn from(u: user::Model) -> Self {
        Self {
            id: u.id,
            email: u.email,
            first_name: u.first_name,
            last_name: u.last_name,
            role: u.role,
            is_premium: u.is_premium,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileInput {
    #[validate(length(min = 1, max = 64), regex(path = *NAME_RE))]
    pub first_name: String,
    #[validate(length(min = 1, max = 64), regex(path = *NAME_RE))]
    pub last_name: String,
    #[validate(length(max = 256))]
    pub university: Option<String>,
    #[validate(length(max = 64))]
    pub course: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsInput {
    pub email_notifications: bool,
    pub study_reminders: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordInput {
    #[validate(length(min = 1))]
    pub current_password: String,
    #[validate(length(min = 6, max = 128))]
    pub new_password: String,
}

#[derive(Clone)]
pub struct UserService {
    user_repo: UserRepository,
}

impl UserService {
    #[must_use]
    pub const fn new(user_repo: UserRepository) -> Self {
        Self { user_repo }
    }

    pub async fn profile(&self, user_id: &str) -> AppResult<Profile> {
        self.user_repo.get_by_id(user_id).await.map(Profile::from)
    }

    pub async fn update_profile(&self, user_id: &str, input: UpdateProfileInput) -> AppResult<Profile> {
        input.validate()?;

        let user = self.user_repo.get_by_id(user_id).await?;
        let mut active: user::ActiveModel = user.into();
        active.first_name = Set(input.first_name);
        active.last_name = Set(input.last_name);
        active.university = Set(trimmed(input.university));
        active.course = Set(trimmed(input.course));
        active.updated_at = Set(Some(Utc::now().into()));

        let updated = self.user_repo.update(active).await?;
        Ok(updated.into())
    }

    pub async fn update_settings(&self, user_id: &str, input: UpdateSettingsInput) -> AppResult<Profile> {
        let user = self.user_repo.get_by_id(user_id).await?;
        let mut active: user::ActiveModel = user.into();
        active.email_notifications = Set(input.email_notifications);
        active.study_reminders = Set(input.study_reminders);
        active.updated_at = Set(Some(Utc::now().into()));

        Ok(self.user_repo.update(active).await?.into())
    }

    /// Replace the password after checking the current one.
    pub async fn change_password(&self, user_id: &str, input: ChangePasswordInput) -> AppResult<()> {
        input.validate()?;

        let user = self.user_repo.get_by_id(user_id).await?;
        if !verify_password(&input.current_password, &user.password_hash)? {
            return Err(AppError::BadRequest(
                "Current password is incorrect".to_string(),
            ));
        }

        let mut active: user::ActiveModel = user.into();
        active.password_hash = Set(hash_password(&input.new_password)?);
        active.updated_at = Set(Some(Utc::now().into()));
        self.user_repo.update(active).await?;

        info!(user_id = %user_id, "Password changed");
        Ok(())
    }

    /// Soft-delete the caller's account. The row stays for audit history.
    pub async fn delete_account(&self, user_id: &str) -> AppResult<()> {
        self.user_repo.soft_delete(user_id, Utc::now()).await?;
        info!(user_id = %user_id, "Account deleted by owner");
        Ok(())
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

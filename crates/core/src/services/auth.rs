//! Registration, login and email verification.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::Utc;
use medlearn_common::{AppError, AppResult, IdGenerator, Metrics};
use medlearn_db::{
    entities::user::{self, Role},
    repositories::UserRepository,
};
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::Set;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

use super::ban::{BanService, DenyReason};
use super::jwt::JwtManager;

#[allow(clippy::unwrap_used)]
pub(crate) static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]+$").unwrap());

/// Input for registering a new account.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInput {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 6, max = 128))]
    pub password: String,

    #[validate(length(min = 1, max = 64), regex(path = *NAME_RE))]
    pub first_name: String,

    #[validate(length(min = 1, max = 64), regex(path = *NAME_RE))]
    pub last_name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginInput {
    #[validate(length(min = 1, max = 254))]
    pub email: String,

    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

/// Result of a registration.
#[derive(Debug, Clone)]
pub struct Registered {
    pub user: user::Model,
    pub verification_required: bool,
}

/// Result of a login attempt.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Success { token: String, user: user::Model },
    /// Banned or deleted. Decided before the password is looked at.
    Denied(DenyReason),
    InvalidCredentials,
    EmailNotVerified,
}

/// Authentication service.
#[derive(Clone)]
pub struct AuthService {
    user_repo: UserRepository,
    ban_service: BanService,
    jwt: JwtManager,
    metrics: Arc<Metrics>,
    id_gen: IdGenerator,
    require_verification: bool,
}

impl AuthService {
    #[must_use]
    pub const fn new(
        user_repo: UserRepository,
        ban_service: BanService,
        jwt: JwtManager,
        metrics: Arc<Metrics>,
        require_verification: bool,
    ) -> Self {
        Self {
            user_repo,
            ban_service,
            jwt,
            metrics,
            id_gen: IdGenerator::new(),
            require_verification,
        }
    }

    #[must_use]
    pub const fn jwt(&self) -> &JwtManager {
        &self.jwt
    }

    /// Create an unverified student account.
    pub async fn register(&self, input: RegisterInput) -> AppResult<Registered> {
        input.validate()?;
        let email = normalize_email(&input.email);

        if self.user_repo.find_by_email(&email).await?.is_some() {
            return Err(AppError::BadRequest(
                "User with this email already exists".to_string(),
            ));
        }

        let password_hash = hash_password(&input.password)?;
        let verification_token = if self.require_verification {
            Some(self.issue_verification_token(&email)?)
        } else {
            None
        };

        let model = user::ActiveModel {
            id: Set(self.id_gen.generate()),
            email: Set(email.clone()),
            password_hash: Set(password_hash),
            first_name: Set(input.first_name),
            last_name: Set(input.last_name),
            role: Set(Role::Student),
            is_verified: Set(!self.require_verification),
            verification_token: Set(verification_token.clone()),
            is_premium: Set(false),
            is_deleted: Set(false),
            is_banned: Set(false),
            email_notifications: Set(true),
            study_reminders: Set(true),
            created_at: Set(Utc::now().into()),
            ..Default::default()
        };

        let user = self.user_repo.create(model).await?;

        if let Some(token) = verification_token {
            // No mail transport; operators pick the link up from the log.
            info!(
                user_id = %user.id,
                email = %email,
                link = %format!("/api/auth/verify-email?token={token}"),
                "Verification link issued"
            );
        }

        Ok(Registered {
            user,
            verification_required: self.require_verification,
        })
    }

    /// Check ban state first, then credentials, then verification.
    pub async fn login(&self, input: LoginInput) -> AppResult<LoginOutcome> {
        input.validate()?;
        let email = normalize_email(&input.email);

        if let Some(reason) = self.ban_service.check_access_by_email(&email).await? {
            self.metrics.record_login(false);
            return Ok(LoginOutcome::Denied(reason));
        }

        let Some(user) = self.user_repo.find_by_email(&email).await? else {
            self.metrics.record_login(false);
            return Ok(LoginOutcome::InvalidCredentials);
        };

        if !verify_password(&input.password, &user.password_hash)? {
            self.metrics.record_login(false);
            return Ok(LoginOutcome::InvalidCredentials);
        }

        if !user.is_verified {
            self.metrics.record_login(false);
            return Ok(LoginOutcome::EmailNotVerified);
        }

        if let Err(e) = self.user_repo.touch_last_login(&user.id, Utc::now()).await {
            warn!(user_id = %user.id, error = %e, "Failed to update last login");
        }

        let token = self
            .jwt
            .issue_access_token(&user.id, &user.email)
            .map_err(|e| AppError::Internal(format!("Failed to sign token: {e}")))?;

        self.metrics.record_login(true);
        info!(user_id = %user.id, "User logged in");
        Ok(LoginOutcome::Success { token, user })
    }

    /// Mark the account behind `token` verified.
    pub async fn verify_email(&self, token: &str) -> AppResult<user::Model> {
        let invalid = || AppError::BadRequest("Invalid or expired verification token".to_string());

        let claims = self.jwt.validate_verification(token).map_err(|_| invalid())?;
        let user = self
            .user_repo
            .find_by_email(&claims.email)
            .await?
            .ok_or_else(invalid)?;

        if user.verification_token.as_deref() != Some(token) {
            return Err(invalid());
        }

        let mut model: user::ActiveModel = user.into();
        model.is_verified = Set(true);
        model.verification_token = Set(None);
        model.updated_at = Set(Some(Utc::now().into()));
        let user = self.user_repo.update(model).await?;

        info!(user_id = %user.id, "Email verified");
        Ok(user)
    }

    /// Issue a fresh verification token.
    pub async fn resend_verification(&self, email: &str) -> AppResult<()> {
        let email = normalize_email(email);
        let user = self
            .user_repo
            .find_by_email(&email)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        if user.is_verified {
            return Err(AppError::BadRequest("Email is already verified".to_string()));
        }

        let token = self.issue_verification_token(&email)?;
        let user_id = user.id.clone();

        let mut model: user::ActiveModel = user.into();
        model.verification_token = Set(Some(token.clone()));
        model.updated_at = Set(Some(Utc::now().into()));
        self.user_repo.update(model).await?;

        info!(
            user_id = %user_id,
            link = %format!("/api/auth/verify-email?token={token}"),
            "Verification link reissued"
        );
        Ok(())
    }

    fn issue_verification_token(&self, email: &str) -> AppResult<String> {
        self.jwt
            .issue_verification_token(email)
            .map_err(|e| AppError::Internal(format!("Failed to sign token: {e}")))
    }
}

/// Emails are stored and looked up lowercased.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Hash a password with Argon2id.
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {e}")))
}

/// Verify a password against a stored hash.
pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| AppError::Internal(format!("Invalid hash: {e}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

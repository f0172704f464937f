//! Request extractors.
//!
//! All of them read the [`Identity`] the auth middleware attached to the
//! request; none of them touch the database.

use axum::{extract::FromRequestParts, http::request::Parts};
use medlearn_db::entities::user;

use crate::response::AccessError;

/// Who is making the request, as resolved by the auth middleware.
#[derive(Debug, Clone)]
pub enum Identity {
    /// No `Authorization` header.
    Anonymous,
    /// Valid token and the account may act.
    User {
        user: user::Model,
        /// An expired ban was lifted while checking this request.
        ban_lifted: bool,
    },
    /// A token was sent but access was refused.
    Rejected(AccessError),
}

fn identity(parts: &Parts) -> Identity {
    parts
        .extensions
        .get::<Identity>()
        .cloned()
        .unwrap_or(Identity::Anonymous)
}

/// Authenticated user extractor.
#[derive(Debug, Clone)]
pub struct AuthUser(pub user::Model);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AccessError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match identity(parts) {
            Identity::User { user, .. } => Ok(Self(user)),
            Identity::Anonymous => Err(AccessError::NoToken),
            Identity::Rejected(e) => Err(e),
        }
    }
}

/// Optional authenticated user extractor.
///
/// A missing or unparseable token reads as anonymous. A banned, deleted or
/// unknown account is still rejected.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<user::Model>);

impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
{
    type Rejection = AccessError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match identity(parts) {
            Identity::User { user, .. } => Ok(Self(Some(user))),
            Identity::Anonymous | Identity::Rejected(AccessError::InvalidToken) => Ok(Self(None)),
            Identity::Rejected(e) => Err(e),
        }
    }
}

/// [`AuthUser`] plus whether this very request lifted an expired ban.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: user::Model,
    pub ban_lifted: bool,
}

impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = AccessError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match identity(parts) {
            Identity::User { user, ban_lifted } => Ok(Self { user, ban_lifted }),
            Identity::Anonymous => Err(AccessError::NoToken),
            Identity::Rejected(e) => Err(e),
        }
    }
}

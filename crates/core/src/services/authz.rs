//! Role-based authorization.
//!
//! Every protected operation names a [`Capability`]; [`RoleCapabilities::can`]
//! is the single table deciding which roles hold it.

use medlearn_common::{AppError, AppResult};
use medlearn_db::entities::user::{self, Role};
use serde::Serialize;

/// Something a user may be allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    /// Start and finish quizzes.
    TakeQuizzes,
    /// Create and delete subjects, categories, tests and resources.
    ManageContent,
    /// Read platform-wide statistics.
    ViewAdminStats,
    /// List users and ban or unban them.
    ModerateUsers,
    /// Change roles and premium flags, hard-delete accounts.
    ManageUsers,
    /// Invalidate cached responses by hand.
    ManageCache,
}

impl Capability {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TakeQuizzes => "take_quizzes",
            Self::ManageContent => "manage_content",
            Self::ViewAdminStats => "view_admin_stats",
            Self::ModerateUsers => "moderate_users",
            Self::ManageUsers => "manage_users",
            Self::ManageCache => "manage_cache",
        }
    }
}

/// Capability lookup for [`Role`].
pub trait RoleCapabilities {
    /// Whether this role holds `capability`.
    fn can(&self, capability: Capability) -> bool;

    /// Teacher or admin.
    fn is_elevated(&self) -> bool;
}

impl RoleCapabilities for Role {
    fn can(&self, capability: Capability) -> bool {
        match capability {
            Capability::TakeQuizzes => true,
            Capability::ManageContent
            | Capability::ViewAdminStats
            | Capability::ModerateUsers => matches!(self, Self::Teacher | Self::Admin),
            Capability::ManageUsers | Capability::ManageCache => matches!(self, Self::Admin),
        }
    }

    fn is_elevated(&self) -> bool {
        matches!(self, Self::Teacher | Self::Admin)
    }
}

/// Fail with `Forbidden` unless `user` holds `capability`.
pub fn require(user: &user::Model, capability: Capability) -> AppResult<()> {
    if user.role.can(capability) {
        Ok(())
    } else {
        tracing::debug!(
            user_id = %user.id,
            role = user.role.as_str(),
            capability = capability.as_str(),
            "Capability check failed"
        );
        Err(AppError::Forbidden(format!(
            "Role '{}' is not allowed to {}",
            user.role.as_str(),
            capability.as_str().replace('_', " ")
        )))
    }
}

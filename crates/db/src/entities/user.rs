//! User entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Account role.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum Role {
    #[sea_orm(string_value = "student")]
    #[default]
    Student,
    #[sea_orm(string_value = "teacher")]
    Teacher,
    #[sea_orm(string_value = "admin")]
    Admin,
}

impl Role {
    /// Wire/storage name of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
            Self::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Self::Student),
            "teacher" => Ok(Self::Teacher),
            "admin" => Ok(Self::Admin),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Lowercased login email.
    #[sea_orm(unique)]
    pub email: String,

    #[serde(skip_serializing)]
    pub password_hash: String,

    pub first_name: String,

    pub last_name: String,

    pub role: Role,

    #[sea_orm(default_value = false)]
    pub is_verified: bool,

    /// Outstanding email verification token
    #[sea_orm(nullable)]
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,

    #[sea_orm(default_value = false)]
    pub is_premium: bool,

    /// Soft-deleted accounts can never authenticate.
    #[sea_orm(default_value = false)]
    pub is_deleted: bool,

    // Ban snapshot, derived from the active `user_ban` row.
    #[sea_orm(default_value = false)]
    pub is_banned: bool,

    #[sea_orm(column_type = "Text", nullable)]
    pub ban_reason: Option<String>,

    #[sea_orm(nullable)]
    pub banned_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub banned_until: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub banned_by: Option<String>,

    #[sea_orm(nullable)]
    pub last_login: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub university: Option<String>,

    #[sea_orm(nullable)]
    pub course: Option<String>,

    #[sea_orm(default_value = true)]
    pub email_notifications: bool,

    #[sea_orm(default_value = true)]
    pub study_reminders: bool,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user_ban::Entity")]
    Bans,

    #[sea_orm(has_many = "super::subscription::Entity")]
    Subscriptions,

    #[sea_orm(has_many = "super::test_attempt::Entity")]
    Attempts,
}

impl Related<super::user_ban::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bans.def()
    }
}

impl Related<super::subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscriptions.def()
    }
}

impl Related<super::test_attempt::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Attempts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Display name used in admin listings.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

//! User ban entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One blocking event. At most one row per user has `is_active = true`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "user_ban")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// The banned user.
    pub user_id: String,
    /// The moderator who issued the ban.
    pub banned_by: String,
    #[sea_orm(column_type = "Text")]
    pub ban_reason: String,
    pub banned_at: DateTimeWithTimeZone,
    /// Expiry; `None` for permanent bans.
    pub banned_until: Option<DateTimeWithTimeZone>,
    pub is_permanent: bool,
    pub is_active: bool,
    #[sea_orm(column_type = "Text", nullable)]
    pub unban_reason: Option<String>,
    pub unbanned_at: Option<DateTimeWithTimeZone>,
    /// Moderator who lifted the ban. `None` for automatic expiry.
    pub unbanned_by: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether a temporary ban has run out at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTimeWithTimeZone) -> bool {
        !self.is_permanent && self.banned_until.is_some_and(|until| until <= now)
    }
}

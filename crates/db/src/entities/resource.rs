//! Learning resource entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "resource")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub title: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    /// Body text. Withheld from non-premium readers of premium resources.
    #[sea_orm(column_type = "Text", nullable)]
    pub content: Option<String>,
    /// `article`, `video`, `pdf`, ...
    pub resource_type: String,
    #[sea_orm(nullable)]
    pub url: Option<String>,
    #[sea_orm(nullable)]
    pub subject_id: Option<String>,
    #[sea_orm(nullable)]
    pub category_id: Option<String>,
    pub is_premium: bool,
    pub is_published: bool,
    pub views_count: i32,
    pub created_at: DateTimeWithTimeZone,
    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user_favorite::Entity")]
    Favorites,
}

impl Related<super::user_favorite::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Favorites.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

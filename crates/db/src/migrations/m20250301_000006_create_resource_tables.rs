//! Create resource and user favorite tables.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Resource::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Resource::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Resource::Title).string_len(255).not_null())
                    .col(ColumnDef::new(Resource::Description).text())
                    .col(ColumnDef::new(Resource::Content).text())
                    .col(ColumnDef::new(Resource::ResourceType).string_len(50).not_null())
                    .col(ColumnDef::new(Resource::Url).text())
                    .col(ColumnDef::new(Resource::SubjectId).string_len(32))
                    .col(ColumnDef::new(Resource::CategoryId).string_len(32))
                    .col(ColumnDef::new(Resource::IsPremium).boolean().not_null().default(false))
                    .col(
                        ColumnDef::new(Resource::IsPublished)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Resource::ViewsCount).integer().not_null().default(0))
                    .col(
                        ColumnDef::new(Resource::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Resource::UpdatedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_resource_subject_id")
                            .from(Resource::Table, Resource::SubjectId)
                            .to(Subject::Table, Subject::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_resource_category_id")
                            .from(Resource::Table, Resource::CategoryId)
                            .to(Category::Table, Category::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_resource_type")
                    .table(Resource::Table)
                    .col(Resource::ResourceType)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_resource_subject_id")
                    .table(Resource::Table)
                    .col(Resource::SubjectId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UserFavorite::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserFavorite::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UserFavorite::UserId).string_len(32).not_null())
                    .col(ColumnDef::new(UserFavorite::ResourceId).string_len(32).not_null())
                    .col(
                        ColumnDef::new(UserFavorite::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_favorite_user_id")
                            .from(UserFavorite::Table, UserFavorite::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_favorite_resource_id")
                            .from(UserFavorite::Table, UserFavorite::ResourceId)
                            .to(Resource::Table, Resource::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_favorite_user_resource")
                    .table(UserFavorite::Table)
                    .col(UserFavorite::UserId)
                    .col(UserFavorite::ResourceId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserFavorite::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Resource::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Resource {
    Table,
    Id,
    Title,
    Description,
    Content,
    ResourceType,
    Url,
    SubjectId,
    CategoryId,
    IsPremium,
    IsPublished,
    ViewsCount,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum UserFavorite {
    Table,
    Id,
    UserId,
    ResourceId,
    CreatedAt,
}

#[derive(Iden)]
enum Subject {
    Table,
    Id,
}

#[derive(Iden)]
enum Category {
    Table,
    Id,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}

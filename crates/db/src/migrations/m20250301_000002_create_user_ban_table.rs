//! Create user ban table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserBan::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserBan::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UserBan::UserId).string_len(32).not_null())
                    .col(ColumnDef::new(UserBan::BannedBy).string_len(32).not_null())
                    .col(ColumnDef::new(UserBan::BanReason).text().not_null())
                    .col(
                        ColumnDef::new(UserBan::BannedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(UserBan::BannedUntil).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(UserBan::IsPermanent)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(UserBan::IsActive).boolean().not_null().default(true))
                    .col(ColumnDef::new(UserBan::UnbanReason).text())
                    .col(ColumnDef::new(UserBan::UnbannedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(UserBan::UnbannedBy).string_len(32))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_ban_user_id")
                            .from(UserBan::Table, UserBan::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_ban_user_id")
                    .table(UserBan::Table)
                    .col(UserBan::UserId)
                    .col(UserBan::BannedAt)
                    .to_owned(),
            )
            .await?;

        // At most one active ban per user
        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE UNIQUE INDEX IF NOT EXISTS idx_user_ban_active_user
                ON user_ban (user_id)
                WHERE is_active;
                ",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserBan::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum UserBan {
    Table,
    Id,
    UserId,
    BannedBy,
    BanReason,
    BannedAt,
    BannedUntil,
    IsPermanent,
    IsActive,
    UnbanReason,
    UnbannedAt,
    UnbannedBy,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}

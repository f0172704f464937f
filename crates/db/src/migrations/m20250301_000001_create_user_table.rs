//! Create user table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(User::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(User::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(User::Email).string_len(255).not_null())
                    .col(ColumnDef::new(User::PasswordHash).string_len(255).not_null())
                    .col(ColumnDef::new(User::FirstName).string_len(100).not_null())
                    .col(ColumnDef::new(User::LastName).string_len(100).not_null())
                    .col(
                        ColumnDef::new(User::Role)
                            .string_len(16)
                            .not_null()
                            .default("student"),
                    )
                    .col(ColumnDef::new(User::IsVerified).boolean().not_null().default(false))
                    .col(ColumnDef::new(User::VerificationToken).string_len(1024))
                    .col(ColumnDef::new(User::IsPremium).boolean().not_null().default(false))
                    .col(ColumnDef::new(User::IsDeleted).boolean().not_null().default(false))
                    .col(ColumnDef::new(User::IsBanned).boolean().not_null().default(false))
                    .col(ColumnDef::new(User::BanReason).text())
                    .col(ColumnDef::new(User::BannedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(User::BannedUntil).timestamp_with_time_zone())
                    .col(ColumnDef::new(User::BannedBy).string_len(32))
                    .col(ColumnDef::new(User::LastLogin).timestamp_with_time_zone())
                    .col(ColumnDef::new(User::University).string_len(255))
                    .col(ColumnDef::new(User::Course).string_len(64))
                    .col(
                        ColumnDef::new(User::EmailNotifications)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(User::StudyReminders)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(User::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(User::UpdatedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_email")
                    .table(User::Table)
                    .col(User::Email)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Sweep lookups for temporary bans
        manager
            .create_index(
                Index::create()
                    .name("idx_user_banned_until")
                    .table(User::Table)
                    .col(User::BannedUntil)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_created_at")
                    .table(User::Table)
                    .col(User::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(User::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum User {
    Table,
    Id,
    Email,
    PasswordHash,
    FirstName,
    LastName,
    Role,
    IsVerified,
    VerificationToken,
    IsPremium,
    IsDeleted,
    IsBanned,
    BanReason,
    BannedAt,
    BannedUntil,
    BannedBy,
    LastLogin,
    University,
    Course,
    EmailNotifications,
    StudyReminders,
    CreatedAt,
    UpdatedAt,
}

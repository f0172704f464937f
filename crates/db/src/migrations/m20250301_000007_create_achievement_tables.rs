//! Create achievement tables and seed the built-in achievements.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Achievement::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Achievement::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Achievement::Code)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Achievement::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Achievement::Description).text())
                    .col(ColumnDef::new(Achievement::Icon).string_len(100))
                    .col(ColumnDef::new(Achievement::Points).integer().not_null().default(0))
                    .col(
                        ColumnDef::new(Achievement::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UserAchievement::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserAchievement::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UserAchievement::UserId).string_len(32).not_null())
                    .col(
                        ColumnDef::new(UserAchievement::AchievementId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserAchievement::EarnedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_achievement_user_id")
                            .from(UserAchievement::Table, UserAchievement::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_achievement_achievement_id")
                            .from(UserAchievement::Table, UserAchievement::AchievementId)
                            .to(Achievement::Table, Achievement::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_achievement_unique")
                    .table(UserAchievement::Table)
                    .col(UserAchievement::UserId)
                    .col(UserAchievement::AchievementId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r"
                INSERT INTO achievement (id, code, name, description, icon, points)
                VALUES
                    ('ach_first_test', 'first_test', 'First steps', 'Complete your first test', 'trophy', 10),
                    ('ach_high_score', 'high_score', 'Excellent', 'Score 90% or more on a test', 'star', 25)
                ON CONFLICT (code) DO NOTHING;
                ",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserAchievement::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Achievement::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Achievement {
    Table,
    Id,
    Code,
    Name,
    Description,
    Icon,
    Points,
    CreatedAt,
}

#[derive(Iden)]
enum UserAchievement {
    Table,
    Id,
    UserId,
    AchievementId,
    EarnedAt,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}

//! Create subscription plan and subscription tables.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SubscriptionPlan::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SubscriptionPlan::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SubscriptionPlan::PlanType)
                            .string_len(32)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(SubscriptionPlan::Name).string_len(128).not_null())
                    .col(
                        ColumnDef::new(SubscriptionPlan::DurationMonths)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SubscriptionPlan::PriceCents).integer().not_null())
                    .col(
                        ColumnDef::new(SubscriptionPlan::Features)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'[]'::jsonb")),
                    )
                    .col(
                        ColumnDef::new(SubscriptionPlan::CreatedAt)
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
                    .table(Subscription::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Subscription::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Subscription::UserId).string_len(32).not_null())
                    .col(ColumnDef::new(Subscription::PlanId).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Subscription::StartDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Subscription::EndDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Subscription::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Subscription::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscription_user_id")
                            .from(Subscription::Table, Subscription::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscription_plan_id")
                            .from(Subscription::Table, Subscription::PlanId)
                            .to(SubscriptionPlan::Table, SubscriptionPlan::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_subscription_user_active")
                    .table(Subscription::Table)
                    .col(Subscription::UserId)
                    .col(Subscription::IsActive)
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r#"
                INSERT INTO subscription_plan (id, plan_type, name, duration_months, price_cents, features)
                VALUES
                    ('plan_half_year', 'half_year', 'Premium, 6 months', 6, 2990,
                     '["All premium resources", "Unlimited tests", "Detailed statistics"]'::jsonb),
                    ('plan_year', 'year', 'Premium, 12 months', 12, 4990,
                     '["All premium resources", "Unlimited tests", "Detailed statistics", "Priority support"]'::jsonb)
                ON CONFLICT (plan_type) DO NOTHING;
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Subscription::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SubscriptionPlan::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum SubscriptionPlan {
    Table,
    Id,
    PlanType,
    Name,
    DurationMonths,
    PriceCents,
    Features,
    CreatedAt,
}

#[derive(Iden)]
enum Subscription {
    Table,
    Id,
    UserId,
    PlanId,
    StartDate,
    EndDate,
    IsActive,
    CreatedAt,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}

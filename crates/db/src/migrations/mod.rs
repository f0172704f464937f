//! Database migrations.
//!
//! Schema migrations for the database. Seed rows (subscription plans and
//! built-in achievements) are inserted idempotently alongside their tables.

#![allow(missing_docs)]

use sea_orm_migration::prelude::*;

mod m20250301_000001_create_user_table;
mod m20250301_000002_create_user_ban_table;
mod m20250301_000003_create_subscription_tables;
mod m20250301_000004_create_content_tables;
mod m20250301_000005_create_test_tables;
mod m20250301_000006_create_resource_tables;
mod m20250301_000007_create_achievement_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_user_table::Migration),
            Box::new(m20250301_000002_create_user_ban_table::Migration),
            Box::new(m20250301_000003_create_subscription_tables::Migration),
            Box::new(m20250301_000004_create_content_tables::Migration),
            Box::new(m20250301_000005_create_test_tables::Migration),
            Box::new(m20250301_000006_create_resource_tables::Migration),
            Box::new(m20250301_000007_create_achievement_tables::Migration),
        ]
    }
}

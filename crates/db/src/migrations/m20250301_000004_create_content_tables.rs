//! Create subject, category and subcategory tables.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Subject::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Subject::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Subject::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Subject::Description).text())
                    .col(ColumnDef::new(Subject::Icon).string_len(100))
                    .col(ColumnDef::new(Subject::IsActive).boolean().not_null().default(true))
                    .col(
                        ColumnDef::new(Subject::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Case-insensitive unique subject names
        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE UNIQUE INDEX IF NOT EXISTS idx_subject_name_lower
                ON subject (LOWER(name));
                ",
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Category::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Category::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Category::SubjectId).string_len(32).not_null())
                    .col(ColumnDef::new(Category::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Category::Description).text())
                    .col(ColumnDef::new(Category::IsActive).boolean().not_null().default(true))
                    .col(
                        ColumnDef::new(Category::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_category_subject_id")
                            .from(Category::Table, Category::SubjectId)
                            .to(Subject::Table, Subject::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_category_subject_id")
                    .table(Category::Table)
                    .col(Category::SubjectId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Subcategory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Subcategory::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Subcategory::CategoryId).string_len(32).not_null())
                    .col(ColumnDef::new(Subcategory::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Subcategory::Description).text())
                    .col(
                        ColumnDef::new(Subcategory::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Subcategory::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subcategory_category_id")
                            .from(Subcategory::Table, Subcategory::CategoryId)
                            .to(Category::Table, Category::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_subcategory_category_id")
                    .table(Subcategory::Table)
                    .col(Subcategory::CategoryId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Subcategory::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Category::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Subject::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Subject {
    Table,
    Id,
    Name,
    Description,
    Icon,
    IsActive,
    CreatedAt,
}

#[derive(Iden)]
enum Category {
    Table,
    Id,
    SubjectId,
    Name,
    Description,
    IsActive,
    CreatedAt,
}

#[derive(Iden)]
enum Subcategory {
    Table,
    Id,
    CategoryId,
    Name,
    Description,
    IsActive,
    CreatedAt,
}

//! Create test, question, answer and test attempt tables.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Test::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Test::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Test::SubjectId).string_len(32))
                    .col(ColumnDef::new(Test::CategoryId).string_len(32))
                    .col(ColumnDef::new(Test::SubcategoryId).string_len(32))
                    .col(ColumnDef::new(Test::Title).string_len(255).not_null())
                    .col(ColumnDef::new(Test::Description).text())
                    .col(ColumnDef::new(Test::TimeLimit).integer().not_null().default(30))
                    .col(
                        ColumnDef::new(Test::DifficultyLevel)
                            .string_len(20)
                            .not_null()
                            .default("medium"),
                    )
                    .col(ColumnDef::new(Test::IsPublished).boolean().not_null().default(false))
                    .col(ColumnDef::new(Test::CreatedBy).string_len(32))
                    .col(
                        ColumnDef::new(Test::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_test_subject_id")
                            .from(Test::Table, Test::SubjectId)
                            .to(Subject::Table, Subject::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_test_category_id")
                            .from(Test::Table, Test::CategoryId)
                            .to(Category::Table, Category::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_test_subcategory_id")
                            .from(Test::Table, Test::SubcategoryId)
                            .to(Subcategory::Table, Subcategory::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        for (name, col) in [
            ("idx_test_subject_id", Test::SubjectId),
            ("idx_test_category_id", Test::CategoryId),
            ("idx_test_subcategory_id", Test::SubcategoryId),
        ] {
            manager
                .create_index(
                    Index::create()
                        .name(name)
                        .table(Test::Table)
                        .col(col)
                        .to_owned(),
                )
                .await?;
        }

        manager
            .create_table(
                Table::create()
                    .table(Question::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Question::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Question::TestId).string_len(32).not_null())
                    .col(ColumnDef::new(Question::QuestionText).text().not_null())
                    .col(
                        ColumnDef::new(Question::QuestionType)
                            .string_len(50)
                            .not_null()
                            .default("multiple_choice"),
                    )
                    .col(ColumnDef::new(Question::Explanation).text())
                    .col(ColumnDef::new(Question::Points).integer().not_null().default(1))
                    .col(ColumnDef::new(Question::Position).integer().not_null().default(0))
                    .col(
                        ColumnDef::new(Question::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_question_test_id")
                            .from(Question::Table, Question::TestId)
                            .to(Test::Table, Test::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_question_test_id")
                    .table(Question::Table)
                    .col(Question::TestId)
                    .col(Question::Position)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Answer::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Answer::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Answer::QuestionId).string_len(32).not_null())
                    .col(ColumnDef::new(Answer::AnswerText).text().not_null())
                    .col(ColumnDef::new(Answer::IsCorrect).boolean().not_null().default(false))
                    .col(ColumnDef::new(Answer::Position).integer().not_null().default(0))
                    .col(
                        ColumnDef::new(Answer::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_answer_question_id")
                            .from(Answer::Table, Answer::QuestionId)
                            .to(Question::Table, Question::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_answer_question_id")
                    .table(Answer::Table)
                    .col(Answer::QuestionId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TestAttempt::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TestAttempt::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TestAttempt::UserId).string_len(32).not_null())
                    .col(ColumnDef::new(TestAttempt::TestId).string_len(32).not_null())
                    .col(ColumnDef::new(TestAttempt::Score).integer().not_null())
                    .col(ColumnDef::new(TestAttempt::TotalQuestions).integer().not_null())
                    .col(ColumnDef::new(TestAttempt::CorrectAnswers).integer().not_null())
                    .col(ColumnDef::new(TestAttempt::Percentage).double().not_null())
                    .col(ColumnDef::new(TestAttempt::TimeSpent).integer())
                    .col(
                        ColumnDef::new(TestAttempt::CompletedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_test_attempt_user_id")
                            .from(TestAttempt::Table, TestAttempt::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_test_attempt_test_id")
                            .from(TestAttempt::Table, TestAttempt::TestId)
                            .to(Test::Table, Test::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_test_attempt_user_completed")
                    .table(TestAttempt::Table)
                    .col(TestAttempt::UserId)
                    .col(TestAttempt::CompletedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TestAttempt::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Answer::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Question::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Test::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(Iden)]
enum Test {
    Table,
    Id,
    SubjectId,
    CategoryId,
    SubcategoryId,
    Title,
    Description,
    TimeLimit,
    DifficultyLevel,
    IsPublished,
    CreatedBy,
    CreatedAt,
}

#[derive(Iden)]
enum Question {
    Table,
    Id,
    TestId,
    QuestionText,
    QuestionType,
    Explanation,
    Points,
    Position,
    CreatedAt,
}

#[derive(Iden)]
enum Answer {
    Table,
    Id,
    QuestionId,
    AnswerText,
    IsCorrect,
    Position,
    CreatedAt,
}

#[derive(Iden)]
enum TestAttempt {
    Table,
    Id,
    UserId,
    TestId,
    Score,
    TotalQuestions,
    CorrectAnswers,
    Percentage,
    TimeSpent,
    CompletedAt,
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
enum Subcategory {
    Table,
    Id,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}

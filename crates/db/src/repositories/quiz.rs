//! Quiz repository: tests, their questions and answers, and attempts.

use std::collections::HashMap;
use std::sync::Arc;

use crate::entities::{Answer, Question, Test, TestAttempt, answer, question, test, test_attempt};
use chrono::{DateTime, Utc};
use medlearn_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, FromQueryResult, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
    sea_query::{Expr, Query},
};

/// Which published tests a random pick is drawn from.
#[derive(Debug, Clone, Copy)]
pub enum TestScope<'a> {
    Subject(&'a str),
    Subcategory(&'a str),
}

/// A question with its answer options in display order.
#[derive(Debug, Clone)]
pub struct QuestionWithAnswers {
    pub question: question::Model,
    pub answers: Vec<answer::Model>,
}

/// A test together with its question and attempt counts.
#[derive(Debug, Clone)]
pub struct TestSummary {
    pub test: test::Model,
    pub question_count: i64,
    pub attempt_count: i64,
}

/// A test to create, with everything below it.
#[derive(Debug, Clone)]
pub struct NewTest {
    pub test: test::ActiveModel,
    pub questions: Vec<question::ActiveModel>,
    pub answers: Vec<answer::ActiveModel>,
}

#[derive(Debug, FromQueryResult)]
struct TestCount {
    test_id: String,
    count: i64,
}

/// Quiz repository.
#[derive(Clone)]
pub struct QuizRepository {
    db: Arc<DatabaseConnection>,
}

impl QuizRepository {
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Published tests of a subject, newest first.
    pub async fn list_published_by_subject(&self, subject_id: &str) -> AppResult<Vec<test::Model>> {
        Test::find()
            .filter(test::Column::SubjectId.eq(subject_id))
            .filter(test::Column::IsPublished.eq(true))
            .order_by_desc(test::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// A random published test within `scope`.
    pub async fn random_published(&self, scope: TestScope<'_>) -> AppResult<Option<test::Model>> {
        let query = match scope {
            TestScope::Subject(id) => Test::find().filter(test::Column::SubjectId.eq(id)),
            TestScope::Subcategory(id) => Test::find().filter(test::Column::SubcategoryId.eq(id)),
        };

        query
            .filter(test::Column::IsPublished.eq(true))
            .order_by(Expr::cust("RANDOM()"), Order::Asc)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn find_test(&self, id: &str) -> AppResult<Option<test::Model>> {
        Test::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Questions of a test by position, each with its answers by position.
    pub async fn questions_with_answers(&self, test_id: &str) -> AppResult<Vec<QuestionWithAnswers>> {
        let questions = Question::find()
            .filter(question::Column::TestId.eq(test_id))
            .order_by_asc(question::Column::Position)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if questions.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = questions.iter().map(|q| q.id.clone()).collect();
        let answers = Answer::find()
            .filter(answer::Column::QuestionId.is_in(ids))
            .order_by_asc(answer::Column::Position)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut by_question: HashMap<String, Vec<answer::Model>> = HashMap::new();
        for a in answers {
            by_question.entry(a.question_id.clone()).or_default().push(a);
        }

        Ok(questions
            .into_iter()
            .map(|question| {
                let answers = by_question.remove(&question.id).unwrap_or_default();
                QuestionWithAnswers { question, answers }
            })
            .collect())
    }

    /// Insert a test with its questions and answers in one transaction.
    pub async fn create_test(&self, new_test: NewTest) -> AppResult<test::Model> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let created = new_test
            .test
            .insert(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if !new_test.questions.is_empty() {
            Question::insert_many(new_test.questions)
                .exec_without_returning(&txn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }
        if !new_test.answers.is_empty() {
            Answer::insert_many(new_test.answers)
                .exec_without_returning(&txn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(created)
    }

    /// Rewrite a test and swap its questions and answers in one transaction.
    ///
    /// Attempts already recorded against the test are kept.
    pub async fn replace_test(&self, new_test: NewTest) -> AppResult<test::Model> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let updated = new_test.test.update(&txn).await.map_err(|e| match e {
            DbErr::RecordNotUpdated => AppError::NotFound("Test".to_string()),
            other => AppError::Database(other.to_string()),
        })?;

        let question_ids = Query::select()
            .column(question::Column::Id)
            .from(Question)
            .and_where(question::Column::TestId.eq(updated.id.as_str()))
            .to_owned();

        Answer::delete_many()
            .filter(answer::Column::QuestionId.in_subquery(question_ids))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Question::delete_many()
            .filter(question::Column::TestId.eq(updated.id.as_str()))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if !new_test.questions.is_empty() {
            Question::insert_many(new_test.questions)
                .exec_without_returning(&txn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }
        if !new_test.answers.is_empty() {
            Answer::insert_many(new_test.answers)
                .exec_without_returning(&txn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(updated)
    }

    /// Delete a test together with its answers, questions and attempts.
    pub async fn delete_test(&self, id: &str) -> AppResult<()> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let question_ids = Query::select()
            .column(question::Column::Id)
            .from(Question)
            .and_where(question::Column::TestId.eq(id))
            .to_owned();

        Answer::delete_many()
            .filter(answer::Column::QuestionId.in_subquery(question_ids))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Question::delete_many()
            .filter(question::Column::TestId.eq(id))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        TestAttempt::delete_many()
            .filter(test_attempt::Column::TestId.eq(id))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let result = Test::delete_by_id(id)
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("Test {id}")));
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Every test, newest first, with question and attempt counts.
    pub async fn list_all_with_counts(&self) -> AppResult<Vec<TestSummary>> {
        let tests = Test::find()
            .order_by_desc(test::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let question_counts: HashMap<String, i64> = Question::find()
            .select_only()
            .column(question::Column::TestId)
            .column_as(question::Column::Id.count(), "count")
            .group_by(question::Column::TestId)
            .into_model::<TestCount>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .into_iter()
            .map(|c| (c.test_id, c.count))
            .collect();

        let attempt_counts: HashMap<String, i64> = TestAttempt::find()
            .select_only()
            .column(test_attempt::Column::TestId)
            .column_as(test_attempt::Column::Id.count(), "count")
            .group_by(test_attempt::Column::TestId)
            .into_model::<TestCount>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .into_iter()
            .map(|c| (c.test_id, c.count))
            .collect();

        Ok(tests
            .into_iter()
            .map(|test| TestSummary {
                question_count: question_counts.get(&test.id).copied().unwrap_or(0),
                attempt_count: attempt_counts.get(&test.id).copied().unwrap_or(0),
                test,
            })
            .collect())
    }

    pub async fn count_tests(&self) -> AppResult<u64> {
        Test::find()
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // --- attempts ---

    pub async fn record_attempt(
        &self,
        model: test_attempt::ActiveModel,
    ) -> AppResult<test_attempt::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// All of a user's attempts, newest first, with their tests.
    pub async fn attempts_with_tests(
        &self,
        user_id: &str,
    ) -> AppResult<Vec<(test_attempt::Model, Option<test::Model>)>> {
        TestAttempt::find()
            .filter(test_attempt::Column::UserId.eq(user_id))
            .order_by_desc(test_attempt::Column::CompletedAt)
            .find_also_related(Test)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// A page of a user's attempts, newest first, with their tests.
    pub async fn user_attempts_page(
        &self,
        user_id: &str,
        limit: u64,
        offset: u64,
    ) -> AppResult<(Vec<(test_attempt::Model, Option<test::Model>)>, u64)> {
        let total = self.count_attempts_for_user(user_id).await?;

        let attempts = TestAttempt::find()
            .filter(test_attempt::Column::UserId.eq(user_id))
            .order_by_desc(test_attempt::Column::CompletedAt)
            .offset(offset)
            .limit(limit)
            .find_also_related(Test)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok((attempts, total))
    }

    /// Latest attempts across all users, with their tests.
    pub async fn recent_attempts(
        &self,
        limit: u64,
        offset: u64,
    ) -> AppResult<Vec<(test_attempt::Model, Option<test::Model>)>> {
        TestAttempt::find()
            .order_by_desc(test_attempt::Column::CompletedAt)
            .offset(offset)
            .limit(limit)
            .find_also_related(Test)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn count_attempts_for_user(&self, user_id: &str) -> AppResult<u64> {
        TestAttempt::find()
            .filter(test_attempt::Column::UserId.eq(user_id))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Whether the user has any attempt scoring at least `percentage`.
    pub async fn has_attempt_at_least(&self, user_id: &str, percentage: f64) -> AppResult<bool> {
        let count = TestAttempt::find()
            .filter(test_attempt::Column::UserId.eq(user_id))
            .filter(test_attempt::Column::Percentage.gte(percentage))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(count > 0)
    }

    pub async fn count_attempts(&self) -> AppResult<u64> {
        TestAttempt::find()
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn count_attempts_since(&self, since: DateTime<Utc>) -> AppResult<u64> {
        TestAttempt::find()
            .filter(test_attempt::Column::CompletedAt.gte(since))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Value};
    use std::collections::BTreeMap;

    fn exec(rows: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: rows,
        }
    }

    fn count_row(test_id: &str, n: i64) -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("test_id".to_string(), Value::String(Some(Box::new(test_id.to_string())))),
            ("count".to_string(), Value::BigInt(Some(n))),
        ])
    }

    #[tokio::test]
    async fn test_questions_with_answers_groups_by_question() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[
                    fixtures::question("q1", "t1", 0),
                    fixtures::question("q2", "t1", 1),
                ]])
                .append_query_results([[
                    fixtures::answer("a1", "q1", true),
                    fixtures::answer("a2", "q1", false),
                    fixtures::answer("a3", "q2", true),
                ]])
                .into_connection(),
        );

        let repo = QuizRepository::new(db);
        let questions = repo.questions_with_answers("t1").await.unwrap();
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].question.id, "q1");
        assert_eq!(questions[0].answers.len(), 2);
        assert_eq!(questions[1].answers.len(), 1);
    }

    #[tokio::test]
    async fn test_questions_with_answers_empty_test() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<question::Model>::new()])
                .into_connection(),
        );

        let repo = QuizRepository::new(db);
        assert!(repo.questions_with_answers("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_test_not_found() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0), exec(0), exec(0), exec(0)])
                .into_connection(),
        );

        let repo = QuizRepository::new(db);
        assert!(matches!(
            repo.delete_test("missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_test_cascades_in_one_transaction() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(8), exec(4), exec(2), exec(1)])
                .into_connection(),
        );

        let repo = QuizRepository::new(db.clone());
        repo.delete_test("t1").await.unwrap();
        drop(repo);

        let log = Arc::try_unwrap(db).unwrap().into_transaction_log();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_replace_test_swaps_questions_in_one_transaction() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                // UPDATE test ... RETURNING
                .append_query_results([[fixtures::test("t1", "s1")]])
                // old answers, old questions, new questions, new answers
                .append_exec_results([exec(4), exec(2), exec(1), exec(2)])
                .into_connection(),
        );

        let repo = QuizRepository::new(db.clone());
        let mut test: test::ActiveModel = fixtures::test("t1", "s1").into();
        test.title = sea_orm::Set("Bones, revised".to_string());
        let updated = repo
            .replace_test(NewTest {
                test,
                questions: vec![fixtures::question("q9", "t1", 0).into()],
                answers: vec![
                    fixtures::answer("a9", "q9", true).into(),
                    fixtures::answer("a10", "q9", false).into(),
                ],
            })
            .await
            .unwrap();
        assert_eq!(updated.id, "t1");
        drop(repo);

        let log = Arc::try_unwrap(db).unwrap().into_transaction_log();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_replace_missing_test_is_not_found() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<test::Model>::new()])
                .into_connection(),
        );

        let repo = QuizRepository::new(db);
        let mut test: test::ActiveModel = fixtures::test("missing", "s1").into();
        test.title = sea_orm::Set("Ghost".to_string());
        let result = repo
            .replace_test(NewTest {
                test,
                questions: vec![],
                answers: vec![],
            })
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_all_with_counts() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[fixtures::test("t1", "s1"), fixtures::test("t2", "s1")]])
                .append_query_results([[count_row("t1", 3)]])
                .append_query_results([[count_row("t1", 5), count_row("t2", 1)]])
                .into_connection(),
        );

        let repo = QuizRepository::new(db);
        let tests = repo.list_all_with_counts().await.unwrap();
        assert_eq!(tests[0].question_count, 3);
        assert_eq!(tests[0].attempt_count, 5);
        assert_eq!(tests[1].question_count, 0);
        assert_eq!(tests[1].attempt_count, 1);
    }

    #[tokio::test]
    async fn test_random_published_returns_pick() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[fixtures::test("t7", "s1")]])
                .into_connection(),
        );

        let repo = QuizRepository::new(db);
        let picked = repo
            .random_published(TestScope::Subject("s1"))
            .await
            .unwrap();
        assert_eq!(picked.unwrap().id, "t7");
    }
}

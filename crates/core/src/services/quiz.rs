//! Quiz service: serving tests, scoring attempts, and test authoring.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use medlearn_common::{AppError, AppResult, IdGenerator, Metrics};
use medlearn_db::{
    entities::{answer, question, test, test_attempt},
    repositories::{
        ContentRepository, NewTest, QuestionWithAnswers, QuizRepository, TestScope, TestSummary,
    },
};
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

const DEFAULT_TIME_LIMIT: i32 = 15;
const DEFAULT_DIFFICULTY: &str = "medium";
const QUESTION_TYPE: &str = "multiple_choice";

/// A test as handed to someone taking it. Correct flags are stripped.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizView {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub time_limit: i32,
    pub questions: Vec<QuizQuestion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizQuestion {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: String,
    pub points: i32,
    pub options: Vec<QuizOption>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizOption {
    pub id: String,
    pub text: String,
}

/// A test with everything, correct flags included.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDetails {
    #[serde(flatten)]
    pub test: test::Model,
    pub questions: Vec<QuestionDetails>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionDetails {
    #[serde(flatten)]
    pub question: question::Model,
    pub answers: Vec<answer::Model>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestListItem {
    #[serde(flatten)]
    pub test: test::Model,
    pub question_count: i64,
    pub attempt_count: i64,
}

impl From<TestSummary> for TestListItem {
    fn from(summary: TestSummary) -> Self {
        Self {
            test: summary.test,
            question_count: summary.question_count,
            attempt_count: summary.attempt_count,
        }
    }
}

/// Submitted answers, one slot per question in display order.
#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FinishInput {
    #[validate(length(min = 1))]
    pub test_id: String,
    /// Chosen answer id per question; `None` when skipped.
    pub answers: Vec<Option<String>>,
    #[validate(range(min = 0))]
    pub time_spent: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResult {
    pub question_id: String,
    pub correct: bool,
    pub correct_answer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    pub attempt_id: String,
    pub score: i32,
    pub total_questions: i32,
    pub correct_answers: i32,
    pub percentage: f64,
    pub answers: Vec<AnswerResult>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnswerInput {
    #[validate(length(max = 2000))]
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuestionInput {
    #[validate(length(max = 4000))]
    pub text: String,
    #[validate(length(max = 4000))]
    pub explanation: Option<String>,
    #[validate(range(min = 1, max = 100))]
    pub points: Option<i32>,
    #[validate(nested)]
    pub answers: Vec<CreateAnswerInput>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTestInput {
    pub subject_id: Option<String>,
    pub category_id: Option<String>,
    pub subcategory_id: Option<String>,
    #[validate(length(min = 1, max = 256))]
    pub title: String,
    #[validate(length(max = 4000))]
    pub description: Option<String>,
    #[validate(range(min = 1, max = 600))]
    pub time_limit: Option<i32>,
    pub difficulty_level: Option<String>,
    #[serde(default = "default_true")]
    pub is_published: bool,
    #[validate(length(min = 1), nested)]
    pub questions: Vec<CreateQuestionInput>,
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedTest {
    pub test_id: String,
    pub questions_count: usize,
}

#[derive(Clone)]
pub struct QuizService {
    quiz_repo: QuizRepository,
    content_repo: ContentRepository,
    metrics: Arc<Metrics>,
    id_gen: IdGenerator,
}

impl QuizService {
    #[must_use]
    pub const fn new(
        quiz_repo: QuizRepository,
        content_repo: ContentRepository,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            quiz_repo,
            content_repo,
            metrics,
            id_gen: IdGenerator::new(),
        }
    }

    pub async fn tests_for_subject(&self, subject_id: &str) -> AppResult<Vec<test::Model>> {
        self.quiz_repo.list_published_by_subject(subject_id).await
    }

    /// Start a specific published test.
    pub async fn start_by_id(&self, test_id: &str) -> AppResult<QuizView> {
        let test = self
            .quiz_repo
            .find_test(test_id)
            .await?
            .filter(|t| t.is_published)
            .ok_or_else(|| AppError::NotFound(format!("Test {test_id}")))?;
        self.quiz_view(test).await
    }

    /// Start a random published test of a subject.
    pub async fn start_by_subject(&self, subject_id: &str) -> AppResult<QuizView> {
        self.start_random(TestScope::Subject(subject_id)).await
    }

    /// Start a random published test of a subcategory.
    pub async fn start_by_subcategory(&self, subcategory_id: &str) -> AppResult<QuizView> {
        self.start_random(TestScope::Subcategory(subcategory_id))
            .await
    }

    async fn start_random(&self, scope: TestScope<'_>) -> AppResult<QuizView> {
        let test = self
            .quiz_repo
            .random_published(scope)
            .await?
            .ok_or_else(|| AppError::NotFound("No tests available".to_string()))?;
        self.quiz_view(test).await
    }

    async fn quiz_view(&self, test: test::Model) -> AppResult<QuizView> {
        let questions = self.quiz_repo.questions_with_answers(&test.id).await?;
        Ok(QuizView {
            id: test.id,
            title: test.title,
            description: test.description,
            time_limit: test.time_limit,
            questions: questions
                .into_iter()
                .map(|QuestionWithAnswers { question, answers }| QuizQuestion {
                    id: question.id,
                    text: question.question_text,
                    question_type: question.question_type,
                    points: question.points,
                    options: answers
                        .into_iter()
                        .map(|a| QuizOption {
                            id: a.id,
                            text: a.answer_text,
                        })
                        .collect(),
                })
                .collect(),
        })
    }

    /// Score submitted answers against the stored key and record the attempt.
    pub async fn finish(&self, user_id: &str, input: FinishInput) -> AppResult<QuizResult> {
        input.validate()?;

        if self.quiz_repo.find_test(&input.test_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Test {}", input.test_id)));
        }

        let questions = self.quiz_repo.questions_with_answers(&input.test_id).await?;
        if questions.is_empty() {
            return Err(AppError::BadRequest("Test has no questions".to_string()));
        }
        if input.answers.len() > questions.len() {
            return Err(AppError::BadRequest(format!(
                "Expected at most {} answers, got {}",
                questions.len(),
                input.answers.len()
            )));
        }

        let scored = score(&questions, &input.answers);
        let attempt_id = self.id_gen.generate();

        self.quiz_repo
            .record_attempt(test_attempt::ActiveModel {
                id: Set(attempt_id.clone()),
                user_id: Set(user_id.to_string()),
                test_id: Set(input.test_id.clone()),
                score: Set(scored.score),
                total_questions: Set(scored.total_questions),
                correct_answers: Set(scored.correct_answers),
                percentage: Set(scored.percentage),
                time_spent: Set(input.time_spent),
                completed_at: Set(Utc::now().into()),
            })
            .await?;

        self.metrics.record_quiz_attempt();
        info!(
            user_id = %user_id,
            test_id = %input.test_id,
            percentage = scored.percentage,
            "Quiz finished"
        );

        Ok(QuizResult {
            attempt_id,
            score: scored.score,
            total_questions: scored.total_questions,
            correct_answers: scored.correct_answers,
            percentage: scored.percentage,
            answers: scored.answers,
        })
    }

    /// Create a test with its questions and answers.
    pub async fn create_test(&self, author_id: &str, input: CreateTestInput) -> AppResult<SavedTest> {
        input.validate()?;
        let title = required_title(&input.title)?;

        let (subject_id, category_id, subcategory_id) = self.resolve_placement(&input).await?;
        let test_id = self.id_gen.generate();
        let now = Utc::now();
        let (questions, answers) = self.build_questions(&test_id, &input.questions, now)?;

        let questions_count = questions.len();
        let created = self
            .quiz_repo
            .create_test(NewTest {
                test: test::ActiveModel {
                    id: Set(test_id),
                    subject_id: Set(subject_id),
                    category_id: Set(category_id),
                    subcategory_id: Set(subcategory_id),
                    title: Set(title),
                    description: Set(input.description.filter(|d| !d.trim().is_empty())),
                    time_limit: Set(input.time_limit.unwrap_or(DEFAULT_TIME_LIMIT)),
                    difficulty_level: Set(input
                        .difficulty_level
                        .unwrap_or_else(|| DEFAULT_DIFFICULTY.to_string())),
                    is_published: Set(input.is_published),
                    created_by: Set(Some(author_id.to_string())),
                    created_at: Set(now.into()),
                },
                questions,
                answers,
            })
            .await?;

        info!(test_id = %created.id, author_id = %author_id, questions = questions_count, "Test created");
        Ok(SavedTest {
            test_id: created.id,
            questions_count,
        })
    }

    /// Rewrite a test and replace all of its questions and answers.
    ///
    /// The author and creation time are kept; recorded attempts stay.
    pub async fn update_test(&self, test_id: &str, input: CreateTestInput) -> AppResult<SavedTest> {
        input.validate()?;
        let title = required_title(&input.title)?;

        let existing = self
            .quiz_repo
            .find_test(test_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Test {test_id}")))?;

        let (subject_id, category_id, subcategory_id) = self.resolve_placement(&input).await?;
        let (questions, answers) = self.build_questions(test_id, &input.questions, Utc::now())?;
        let questions_count = questions.len();

        let mut test: test::ActiveModel = existing.into();
        test.subject_id = Set(subject_id);
        test.category_id = Set(category_id);
        test.subcategory_id = Set(subcategory_id);
        test.title = Set(title);
        test.description = Set(input.description.filter(|d| !d.trim().is_empty()));
        test.time_limit = Set(input.time_limit.unwrap_or(DEFAULT_TIME_LIMIT));
        test.difficulty_level = Set(input
            .difficulty_level
            .unwrap_or_else(|| DEFAULT_DIFFICULTY.to_string()));
        test.is_published = Set(input.is_published);

        let updated = self
            .quiz_repo
            .replace_test(NewTest {
                test,
                questions,
                answers,
            })
            .await?;

        info!(test_id = %updated.id, questions = questions_count, "Test updated");
        Ok(SavedTest {
            test_id: updated.id,
            questions_count,
        })
    }

    /// Turn submitted questions into rows under `test_id`, positions in input order.
    fn build_questions(
        &self,
        test_id: &str,
        inputs: &[CreateQuestionInput],
        now: DateTime<Utc>,
    ) -> AppResult<(Vec<question::ActiveModel>, Vec<answer::ActiveModel>)> {
        let mut questions = Vec::with_capacity(inputs.len());
        let mut answers = Vec::new();

        for (index, q) in inputs.iter().enumerate() {
            let number = index + 1;
            let text = q.text.trim();
            let options: Vec<&CreateAnswerInput> =
                q.answers.iter().filter(|a| !a.text.trim().is_empty()).collect();

            if text.is_empty() || options.len() < 2 {
                return Err(AppError::Validation(format!(
                    "Question {number}: add the question text and at least 2 answers"
                )));
            }
            if !options.iter().any(|a| a.is_correct) {
                return Err(AppError::Validation(format!(
                    "Question {number}: mark at least one answer as correct"
                )));
            }

            let question_id = self.id_gen.generate();
            for (position, a) in options.into_iter().enumerate() {
                answers.push(answer::ActiveModel {
                    id: Set(self.id_gen.generate()),
                    question_id: Set(question_id.clone()),
                    answer_text: Set(a.text.trim().to_string()),
                    is_correct: Set(a.is_correct),
                    position: Set(position as i32),
                    created_at: Set(now.into()),
                });
            }
            questions.push(question::ActiveModel {
                id: Set(question_id),
                test_id: Set(test_id.to_string()),
                question_text: Set(text.to_string()),
                question_type: Set(QUESTION_TYPE.to_string()),
                explanation: Set(q
                    .explanation
                    .as_deref()
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)),
                points: Set(q.points.unwrap_or(1)),
                position: Set(index as i32),
                created_at: Set(now.into()),
            });
        }

        Ok((questions, answers))
    }

    /// Fill in the parent ids implied by the most specific one given.
    async fn resolve_placement(
        &self,
        input: &CreateTestInput,
    ) -> AppResult<(Option<String>, Option<String>, Option<String>)> {
        let mut subject_id = input.subject_id.clone();
        let mut category_id = input.category_id.clone();

        if let Some(id) = &input.subcategory_id {
            let sub = self
                .content_repo
                .find_subcategory(id)
                .await?
                .ok_or_else(|| AppError::BadRequest("Subcategory not found".to_string()))?;
            category_id.get_or_insert(sub.category_id);
        }

        if let Some(id) = &category_id {
            let category = self
                .content_repo
                .find_category(id)
                .await?
                .ok_or_else(|| AppError::BadRequest("Category not found".to_string()))?;
            subject_id.get_or_insert(category.subject_id);
        }

        match &subject_id {
            Some(id) => {
                if self.content_repo.find_subject(id).await?.is_none() {
                    return Err(AppError::BadRequest("Subject not found".to_string()));
                }
            }
            None => {
                return Err(AppError::Validation(
                    "A subject, category or subcategory is required".to_string(),
                ));
            }
        }

        Ok((subject_id, category_id, input.subcategory_id.clone()))
    }

    pub async fn list_all(&self) -> AppResult<Vec<TestListItem>> {
        Ok(self
            .quiz_repo
            .list_all_with_counts()
            .await?
            .into_iter()
            .map(TestListItem::from)
            .collect())
    }

    pub async fn details(&self, test_id: &str) -> AppResult<TestDetails> {
        let test = self
            .quiz_repo
            .find_test(test_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Test {test_id}")))?;
        let questions = self.quiz_repo.questions_with_answers(test_id).await?;
        Ok(TestDetails {
            test,
            questions: questions
                .into_iter()
                .map(|q| QuestionDetails {
                    question: q.question,
                    answers: q.answers,
                })
                .collect(),
        })
    }

    /// Questions of a test with their answers, correct flags included.
    pub async fn questions(&self, test_id: &str) -> AppResult<Vec<QuestionDetails>> {
        Ok(self.details(test_id).await?.questions)
    }

    pub async fn delete_test(&self, test_id: &str) -> AppResult<()> {
        self.quiz_repo.delete_test(test_id).await?;
        info!(test_id = %test_id, "Test deleted");
        Ok(())
    }
}

fn required_title(raw: &str) -> AppResult<String> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Test title is required".to_string()));
    }
    Ok(title.to_string())
}

struct Scored {
    score: i32,
    total_questions: i32,
    correct_answers: i32,
    percentage: f64,
    answers: Vec<AnswerResult>,
}

/// Grade `chosen` against the stored answers. Missing slots count as skipped.
fn score(questions: &[QuestionWithAnswers], chosen: &[Option<String>]) -> Scored {
    let mut points = 0;
    let mut correct_count = 0;
    let mut answers = Vec::with_capacity(questions.len());

    for (index, q) in questions.iter().enumerate() {
        let correct_ids: HashSet<&str> = q
            .answers
            .iter()
            .filter(|a| a.is_correct)
            .map(|a| a.id.as_str())
            .collect();

        let correct = chosen
            .get(index)
            .and_then(Option::as_deref)
            .is_some_and(|id| correct_ids.contains(id));

        if correct {
            points += q.question.points;
            correct_count += 1;
        }

        answers.push(AnswerResult {
            question_id: q.question.id.clone(),
            correct,
            correct_answer_id: q
                .answers
                .iter()
                .find(|a| a.is_correct)
                .map(|a| a.id.clone()),
        });
    }

    let total = questions.len() as i32;
    let percentage = if total == 0 {
        0.0
    } else {
        (f64::from(correct_count) * 10_000.0 / f64::from(total)).round() / 100.0
    };

    Scored {
        score: points,
        total_questions: total,
        correct_answers: correct_count,
        percentage,
        answers,
    }
}

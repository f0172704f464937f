//! Learner statistics, progress levels and achievements.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use medlearn_common::{AppResult, IdGenerator};
use medlearn_db::{
    entities::{achievement, test, test_attempt},
    repositories::{AchievementRepository, ContentRepository, QuizRepository},
};
use serde::Serialize;
use tracing::{info, warn};

const RECENT_ACTIVITY: usize = 5;
const HIGH_SCORE_PERCENT: f64 = 90.0;

pub const FIRST_TEST: &str = "first_test";
pub const HIGH_SCORE: &str = "high_score";

/// How far along a learner is in one subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressLevel {
    NotStarted,
    Beginner,
    Learning,
    Practicing,
    Advanced,
    Master,
}

impl ProgressLevel {
    /// Level for `tests` completed attempts averaging `average` percent.
    #[must_use]
    pub fn from_attempts(tests: u64, average: f64) -> Self {
        match tests {
            0 => Self::NotStarted,
            1..=2 => Self::Beginner,
            _ if tests < 10 || average < 60.0 => Self::Learning,
            _ if tests < 20 || average < 75.0 => Self::Practicing,
            _ if tests < 50 || average < 85.0 => Self::Advanced,
            _ => Self::Master,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummary {
    pub id: String,
    pub test_id: String,
    pub test_title: Option<String>,
    pub score: i32,
    pub percentage: f64,
    pub correct_answers: i32,
    pub total_questions: i32,
    pub time_spent: Option<i32>,
    pub completed_at: DateTime<FixedOffset>,
}

impl AttemptSummary {
    fn new(attempt: test_attempt::Model, test: Option<test::Model>) -> Self {
        Self {
            id: attempt.id,
            test_id: attempt.test_id,
            test_title: test.map(|t| t.title),
            score: attempt.score,
            percentage: attempt.percentage,
            correct_answers: attempt.correct_answers,
            total_questions: attempt.total_questions,
            time_spent: attempt.time_spent,
            completed_at: attempt.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestingStats {
    pub total_tests: u64,
    pub average_score: f64,
    pub best_subject: Option<String>,
    pub recent_activity: Vec<AttemptSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub tests_taken: u64,
    pub average_score: f64,
    pub best_score: f64,
    pub study_days: u64,
    pub last_activity: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPage {
    pub activities: Vec<AttemptSummary>,
    pub total: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectProgress {
    pub subject_id: String,
    pub subject_name: String,
    pub icon: Option<String>,
    pub tests_completed: u64,
    pub average_score: f64,
    pub best_score: f64,
    pub last_test_date: Option<DateTime<FixedOffset>>,
    pub level: ProgressLevel,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementView {
    #[serde(flatten)]
    pub achievement: achievement::Model,
    pub unlocked_at: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Default)]
struct Tally {
    count: u64,
    sum: f64,
    best: f64,
    last: Option<DateTime<FixedOffset>>,
}

impl Tally {
    fn add(&mut self, attempt: &test_attempt::Model) {
        self.count += 1;
        self.sum += attempt.percentage;
        self.best = self.best.max(attempt.percentage);
        self.last = self.last.max(Some(attempt.completed_at));
    }

    fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            round2(self.sum / self.count as f64)
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Clone)]
pub struct StatsService {
    quiz_repo: QuizRepository,
    content_repo: ContentRepository,
    achievement_repo: AchievementRepository,
    id_gen: IdGenerator,
}

impl StatsService {
    #[must_use]
    pub const fn new(
        quiz_repo: QuizRepository,
        content_repo: ContentRepository,
        achievement_repo: AchievementRepository,
    ) -> Self {
        Self {
            quiz_repo,
            content_repo,
            achievement_repo,
            id_gen: IdGenerator::new(),
        }
    }

    /// Overall results, the strongest subject and the latest attempts.
    pub async fn testing(&self, user_id: &str) -> AppResult<TestingStats> {
        let attempts = self.quiz_repo.attempts_with_tests(user_id).await?;

        let mut overall = Tally::default();
        let mut per_subject: HashMap<String, Tally> = HashMap::new();
        for (attempt, test) in &attempts {
            overall.add(attempt);
            if let Some(subject_id) = test.as_ref().and_then(|t| t.subject_id.clone()) {
                per_subject.entry(subject_id).or_default().add(attempt);
            }
        }

        let best_subject_id = per_subject
            .iter()
            .max_by(|a, b| a.1.average().total_cmp(&b.1.average()).then(b.0.cmp(a.0)))
            .map(|(id, _)| id.clone());
        let best_subject = match best_subject_id {
            Some(id) => self
                .content_repo
                .subject_names(vec![id.clone()])
                .await?
                .remove(&id),
            None => None,
        };

        Ok(TestingStats {
            total_tests: overall.count,
            average_score: overall.average(),
            best_subject,
            recent_activity: attempts
                .into_iter()
                .take(RECENT_ACTIVITY)
                .map(|(a, t)| AttemptSummary::new(a, t))
                .collect(),
        })
    }

    pub async fn user_stats(&self, user_id: &str) -> AppResult<UserStats> {
        let attempts = self.quiz_repo.attempts_with_tests(user_id).await?;

        let mut tally = Tally::default();
        let mut days: BTreeSet<NaiveDate> = BTreeSet::new();
        for (attempt, _) in &attempts {
            tally.add(attempt);
            days.insert(attempt.completed_at.date_naive());
        }

        Ok(UserStats {
            tests_taken: tally.count,
            average_score: tally.average(),
            best_score: tally.best,
            study_days: days.len() as u64,
            last_activity: tally.last,
        })
    }

    pub async fn activity(&self, user_id: &str, limit: u64, offset: u64) -> AppResult<ActivityPage> {
        let (attempts, total) = self
            .quiz_repo
            .user_attempts_page(user_id, limit, offset)
            .await?;
        let has_more = offset + (attempts.len() as u64) < total;

        Ok(ActivityPage {
            activities: attempts
                .into_iter()
                .map(|(a, t)| AttemptSummary::new(a, t))
                .collect(),
            total,
            has_more,
        })
    }

    /// Progress in every active subject, including untouched ones.
    pub async fn progress(&self, user_id: &str) -> AppResult<Vec<SubjectProgress>> {
        let subjects = self.content_repo.list_subjects().await?;
        let attempts = self.quiz_repo.attempts_with_tests(user_id).await?;

        let mut per_subject: HashMap<String, Tally> = HashMap::new();
        for (attempt, test) in &attempts {
            if let Some(subject_id) = test.as_ref().and_then(|t| t.subject_id.clone()) {
                per_subject.entry(subject_id).or_default().add(attempt);
            }
        }

        Ok(subjects
            .into_iter()
            .map(|s| {
                let tally = per_subject.remove(&s.id).unwrap_or_default();
                SubjectProgress {
                    level: ProgressLevel::from_attempts(tally.count, tally.average()),
                    tests_completed: tally.count,
                    average_score: tally.average(),
                    best_score: tally.best,
                    last_test_date: tally.last,
                    subject_id: s.id,
                    subject_name: s.name,
                    icon: s.icon,
                }
            })
            .collect())
    }

    pub async fn achievements(&self, user_id: &str) -> AppResult<Vec<AchievementView>> {
        let all = self.achievement_repo.list_all().await?;
        let earned: HashMap<String, DateTime<FixedOffset>> = self
            .achievement_repo
            .earned(user_id)
            .await?
            .into_iter()
            .map(|ua| (ua.achievement_id, ua.earned_at))
            .collect();

        Ok(all
            .into_iter()
            .map(|a| AchievementView {
                unlocked_at: earned.get(&a.id).copied(),
                achievement: a,
            })
            .collect())
    }

    /// Award every achievement the user now qualifies for.
    /// Returns the ones newly earned by this call.
    pub async fn check_achievements(&self, user_id: &str) -> AppResult<Vec<achievement::Model>> {
        let mut qualified = Vec::new();
        if self.quiz_repo.count_attempts_for_user(user_id).await? > 0 {
            qualified.push(FIRST_TEST);
        }
        if self
            .quiz_repo
            .has_attempt_at_least(user_id, HIGH_SCORE_PERCENT)
            .await?
        {
            qualified.push(HIGH_SCORE);
        }

        let now = Utc::now();
        let mut newly_earned = Vec::new();
        for code in qualified {
            let Some(achievement) = self.achievement_repo.find_by_code(code).await? else {
                warn!(code = %code, "Achievement is not seeded");
                continue;
            };
            if self
                .achievement_repo
                .award(self.id_gen.generate(), user_id, &achievement.id, now)
                .await?
            {
                info!(user_id = %user_id, code = %code, "Achievement earned");
                newly_earned.push(achievement);
            }
        }

        Ok(newly_earned)
    }
}

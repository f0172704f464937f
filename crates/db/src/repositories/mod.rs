//! Database repositories.

#![allow(missing_docs)]

pub mod achievement;
pub mod ban;
pub mod content;
pub mod quiz;
pub mod resource;
pub mod subscription;
pub mod user;

pub use achievement::AchievementRepository;
pub use ban::{AUTO_UNBAN_REASON, BanClosure, BanRepository, NewBan};
pub use content::ContentRepository;
pub use quiz::{NewTest, QuestionWithAnswers, QuizRepository, TestScope, TestSummary};
pub use resource::{ResourceRepository, TypeCount};
pub use subscription::SubscriptionRepository;
pub use user::{UserCounts, UserRepository};

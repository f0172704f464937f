//! Business logic services.

#![allow(missing_docs)]

pub mod admin;
pub mod auth;
pub mod authz;
pub mod ban;
pub mod content;
pub mod jobs;
pub mod jwt;
pub mod quiz;
pub mod resource;
pub mod stats;
pub mod subscription;
pub mod user;

pub use admin::{
    ActivityEntry, AdminService, AdminUserView, DashboardStats, SetPremiumInput, SetRoleInput,
    UserPage, UsersStats,
};
pub use auth::{AuthService, LoginInput, LoginOutcome, RegisterInput, Registered};
pub use authz::{Capability, RoleCapabilities, require};
pub use ban::{AccessDecision, BanDetails, BanInput, BanService, DenyReason};
pub use content::{
    CategoryWithSubject, ContentService, CreateCategoryInput, CreateSubcategoryInput,
    CreateSubjectInput,
};
pub use jobs::{JobService, JobWorkerContext};
pub use jwt::{AccessClaims, JwtManager, VerificationClaims};
pub use quiz::{
    AnswerResult, CreateAnswerInput, CreateQuestionInput, CreateTestInput, FinishInput,
    QuestionDetails, QuizResult, QuizService, QuizView, SavedTest, TestDetails, TestListItem,
};
pub use resource::{CreateResourceInput, ResourceService, ResourceStats, ResourceView};
pub use stats::{
    AchievementView, ActivityPage, ProgressLevel, StatsService, SubjectProgress, TestingStats,
    UserStats,
};
pub use subscription::{CurrentSubscription, Period, PurchaseInput, SubscriptionService};
pub use user::{
    ChangePasswordInput, Profile, UpdateProfileInput, UpdateSettingsInput, UserService,
    UserSummary,
};

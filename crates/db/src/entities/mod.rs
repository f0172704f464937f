//! Database entities.

#![allow(missing_docs)]

pub mod achievement;
pub mod answer;
pub mod category;
pub mod question;
pub mod resource;
pub mod subcategory;
pub mod subject;
pub mod subscription;
pub mod subscription_plan;
pub mod test;
pub mod test_attempt;
pub mod user;
pub mod user_achievement;
pub mod user_ban;
pub mod user_favorite;

pub use achievement::Entity as Achievement;
pub use answer::Entity as Answer;
pub use category::Entity as Category;
pub use question::Entity as Question;
pub use resource::Entity as Resource;
pub use subcategory::Entity as Subcategory;
pub use subject::Entity as Subject;
pub use subscription::Entity as Subscription;
pub use subscription_plan::Entity as SubscriptionPlan;
pub use test::Entity as Test;
pub use test_attempt::Entity as TestAttempt;
pub use user::Entity as User;
pub use user_achievement::Entity as UserAchievement;
pub use user_ban::Entity as UserBan;
pub use user_favorite::Entity as UserFavorite;

//! Subscription repository.

use std::sync::Arc;

use crate::entities::{Subscription, SubscriptionPlan, User, subscription, subscription_plan, user};
use chrono::{DateTime, Utc};
use medlearn_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait, sea_query::Expr,
};

/// Subscription repository for database operations.
#[derive(Clone)]
pub struct SubscriptionRepository {
    db: Arc<DatabaseConnection>,
}

impl SubscriptionRepository {
    /// Create a new subscription repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// All plans, cheapest first.
    pub async fn list_plans(&self) -> AppResult<Vec<subscription_plan::Model>> {
        SubscriptionPlan::find()
            .order_by_asc(subscription_plan::Column::PriceCents)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn find_plan_by_type(
        &self,
        plan_type: &str,
    ) -> AppResult<Option<subscription_plan::Model>> {
        SubscriptionPlan::find()
            .filter(subscription_plan::Column::PlanType.eq(plan_type))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// The user's newest active subscription together with its plan.
    pub async fn find_current(
        &self,
        user_id: &str,
    ) -> AppResult<Option<(subscription::Model, Option<subscription_plan::Model>)>> {
        Subscription::find()
            .filter(subscription::Column::UserId.eq(user_id))
            .filter(subscription::Column::IsActive.eq(true))
            .order_by_desc(subscription::Column::CreatedAt)
            .find_also_related(SubscriptionPlan)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Replace any active subscription with a new one and flag the user premium.
    pub async fn purchase(
        &self,
        id: String,
        user_id: &str,
        plan: &subscription_plan::Model,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<subscription::Model> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Subscription::update_many()
            .col_expr(subscription::Column::IsActive, Expr::value(false))
            .filter(subscription::Column::UserId.eq(user_id))
            .filter(subscription::Column::IsActive.eq(true))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let created = subscription::ActiveModel {
            id: Set(id),
            user_id: Set(user_id.to_string()),
            plan_id: Set(plan.id.clone()),
            start_date: Set(start.into()),
            end_date: Set(end.into()),
            is_active: Set(true),
            created_at: Set(start.into()),
        }
        .insert(&txn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        User::update_many()
            .col_expr(user::Column::IsPremium, Expr::value(true))
            .filter(user::Column::Id.eq(user_id))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(created)
    }

    /// Deactivate all active subscriptions and clear the premium flag.
    /// Returns how many subscriptions were deactivated.
    pub async fn cancel(&self, user_id: &str) -> AppResult<u64> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let result = Subscription::update_many()
            .col_expr(subscription::Column::IsActive, Expr::value(false))
            .filter(subscription::Column::UserId.eq(user_id))
            .filter(subscription::Column::IsActive.eq(true))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        User::update_many()
            .col_expr(user::Column::IsPremium, Expr::value(false))
            .filter(user::Column::Id.eq(user_id))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }

    pub async fn count_active(&self) -> AppResult<u64> {
        Subscription::find()
            .filter(subscription::Column::IsActive.eq(true))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

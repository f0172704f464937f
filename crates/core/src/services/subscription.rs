//! Subscription plans and purchases.

use chrono::{DateTime, Months, Utc};
use medlearn_common::{AppError, AppResult, IdGenerator};
use medlearn_db::{
    entities::{subscription, subscription_plan},
    repositories::SubscriptionRepository,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Billing period of a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    HalfYear,
    Year,
}

impl Period {
    #[must_use]
    pub const fn months(self) -> u32 {
        match self {
            Self::HalfYear => 6,
            Self::Year => 12,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseInput {
    pub plan_type: String,
    /// Defaults to the plan's own duration.
    pub period: Option<Period>,
}

/// The caller's subscription state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentSubscription {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<subscription::Model>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<subscription_plan::Model>,
}

#[derive(Clone)]
pub struct SubscriptionService {
    subscription_repo: SubscriptionRepository,
    id_gen: IdGenerator,
}

impl SubscriptionService {
    #[must_use]
    pub const fn new(subscription_repo: SubscriptionRepository) -> Self {
        Self {
            subscription_repo,
            id_gen: IdGenerator::new(),
        }
    }

    pub async fn plans(&self) -> AppResult<Vec<subscription_plan::Model>> {
        self.subscription_repo.list_plans().await
    }

    /// The active subscription, if it has not run out yet.
    pub async fn current(&self, user_id: &str) -> AppResult<CurrentSubscription> {
        self.current_at(user_id, Utc::now()).await
    }

    pub async fn current_at(&self, user_id: &str, now: DateTime<Utc>) -> AppResult<CurrentSubscription> {
        match self.subscription_repo.find_current(user_id).await? {
            Some((sub, plan)) if sub.end_date > now => Ok(CurrentSubscription {
                active: true,
                subscription: Some(sub),
                plan,
            }),
            _ => Ok(CurrentSubscription {
                active: false,
                subscription: None,
                plan: None,
            }),
        }
    }

    pub async fn purchase(&self, user_id: &str, input: PurchaseInput) -> AppResult<subscription::Model> {
        self.purchase_at(user_id, input, Utc::now()).await
    }

    /// Replace the current subscription with a new one starting at `now`.
    pub async fn purchase_at(
        &self,
        user_id: &str,
        input: PurchaseInput,
        now: DateTime<Utc>,
    ) -> AppResult<subscription::Model> {
        let plan = self
            .subscription_repo
            .find_plan_by_type(input.plan_type.trim())
            .await?
            .ok_or_else(|| {
                AppError::BadRequest(format!("Invalid subscription plan: {}", input.plan_type))
            })?;

        let months = match input.period {
            Some(period) => period.months(),
            None => u32::try_from(plan.duration_months).map_err(|_| {
                AppError::Internal(format!("Plan {} has a negative duration", plan.id))
            })?,
        };
        let end = now
            .checked_add_months(Months::new(months))
            .ok_or_else(|| AppError::Internal("Subscription end date overflow".to_string()))?;

        let created = self
            .subscription_repo
            .purchase(self.id_gen.generate(), user_id, &plan, now, end)
            .await?;

        info!(user_id = %user_id, plan = %plan.plan_type, months, "Subscription purchased");
        Ok(created)
    }

    pub async fn cancel(&self, user_id: &str) -> AppResult<u64> {
        let cancelled = self.subscription_repo.cancel(user_id).await?;
        info!(user_id = %user_id, cancelled, "Subscription cancelled");
        Ok(cancelled)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use medlearn_db::test_utils::fixtures;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::sync::Arc;

    fn exec(rows: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: rows,
        }
    }

    #[tokio::test]
    async fn test_unknown_plan_is_bad_request() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<subscription_plan::Model>::new()])
            .into_connection();
        let service = SubscriptionService::new(SubscriptionRepository::new(Arc::new(db)));

        let result = service
            .purchase(
                "u1",
                PurchaseInput {
                    plan_type: "lifetime".to_string(),
                    period: None,
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_purchase_year_period() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[fixtures::plan("p1", "half_year", 6)]])
            .append_exec_results([exec(1)])
            .append_query_results([[fixtures::subscription("s1", "u1", end, true)]])
            .append_exec_results([exec(1)])
            .into_connection();
        let service = SubscriptionService::new(SubscriptionRepository::new(Arc::new(db)));

        let sub = service
            .purchase_at(
                "u1",
                PurchaseInput {
                    plan_type: "half_year".to_string(),
                    period: Some(Period::Year),
                },
                now,
            )
            .await
            .unwrap();
        assert_eq!(sub.end_date, end.fixed_offset());
    }

    #[tokio::test]
    async fn test_current_ignores_run_out_subscription() {
        let now = Utc::now();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[(
                fixtures::subscription("s1", "u1", now - Duration::days(1), true),
                fixtures::plan("plan_half_year", "half_year", 6),
            )]])
            .into_connection();
        let service = SubscriptionService::new(SubscriptionRepository::new(Arc::new(db)));

        let current = service.current_at("u1", now).await.unwrap();
        assert!(!current.active);
        assert_eq!(
            serde_json::to_value(&current).unwrap(),
            serde_json::json!({"active": false})
        );
    }

    #[test]
    fn test_period_deserializes_snake_case() {
        let input: PurchaseInput =
            serde_json::from_str(r#"{"planType":"year","period":"half_year"}"#).unwrap();
        assert_eq!(input.period, Some(Period::HalfYear));
        assert_eq!(Period::Year.months(), 12);
    }
}

//! Subscription endpoints.

use axum::{
    Json, Router,
    extract::State,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use medlearn_common::AppResult;
use medlearn_core::{CurrentSubscription, PurchaseInput};
use medlearn_db::entities::{subscription, subscription_plan};
use serde::Serialize;

use crate::{
    cache::{CachePolicy, families, invalidate_cache, response_cache},
    extractors::AuthUser,
    middleware::AppState,
    response::{ApiResponse, Created},
};

pub fn router(state: &AppState) -> Router<AppState> {
    let touches_membership =
        || from_fn_with_state(state.invalidates(families::MEMBERSHIP), invalidate_cache);

    Router::new()
        .route(
            "/plans",
            get(plans).layer(from_fn_with_state(
                state.cached(CachePolicy::STATIC),
                response_cache,
            )),
        )
        .route("/current", get(current))
        .route("/purchase", post(purchase).layer(touches_membership()))
        .route("/cancel", post(cancel).layer(touches_membership()))
}

async fn plans(
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<subscription_plan::Model>>> {
    Ok(ApiResponse::ok(state.subscription_service.plans().await?))
}

async fn current(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<CurrentSubscription>> {
    Ok(ApiResponse::ok(
        state.subscription_service.current(&user.id).await?,
    ))
}

#[derive(Serialize)]
struct Purchased {
    message: &'static str,
    subscription: subscription::Model,
}

async fn purchase(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(input): Json<PurchaseInput>,
) -> AppResult<Created<Purchased>> {
    let subscription = state.subscription_service.purchase(&user.id, input).await?;
    Ok(Created(Purchased {
        message: "Subscription activated",
        subscription,
    }))
}

#[derive(Serialize)]
struct Cancelled {
    message: &'static str,
    cancelled: u64,
}

async fn cancel(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Cancelled>> {
    let cancelled = state.subscription_service.cancel(&user.id).await?;
    Ok(ApiResponse::ok(Cancelled {
        message: "Subscription cancelled",
        cancelled,
    }))
}

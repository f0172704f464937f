//! Authentication endpoints.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use medlearn_common::{AppError, AppResult};
use medlearn_core::{LoginInput, LoginOutcome, RegisterInput, UserSummary};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use crate::{
    extractors::Session,
    middleware::AppState,
    rate_limit::rate_limit_auth,
    response::{ApiResponse, Created, denied, message},
};

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/verify-email", get(verify_email))
        .route("/resend-verification", post(resend_verification))
        .route("/status", get(status))
        .layer(from_fn_with_state(state.rate_limiter.clone(), rate_limit_auth))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    message: &'static str,
    verification_required: bool,
}

async fn register(
    State(state): State<AppState>,
    Json(input): Json<RegisterInput>,
) -> AppResult<Created<RegisterResponse>> {
    let registered = state.auth_service.register(input).await?;

    let message = if registered.verification_required {
        "Registration successful. Check your email to verify your account."
    } else {
        "Registration successful"
    };
    Ok(Created(RegisterResponse {
        message,
        verification_required: registered.verification_required,
    }))
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    user: UserSummary,
}

async fn login(State(state): State<AppState>, Json(input): Json<LoginInput>) -> AppResult<Response> {
    let response = match state.auth_service.login(input).await? {
        LoginOutcome::Success { token, user } => ApiResponse::ok(LoginResponse {
            token,
            user: user.into(),
        })
        .into_response(),
        LoginOutcome::Denied(reason) => denied(&reason),
        LoginOutcome::InvalidCredentials => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": { "code": "INVALID_CREDENTIALS", "message": "Invalid email or password" }
            })),
        )
            .into_response(),
        LoginOutcome::EmailNotVerified => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": {
                    "code": "EMAIL_NOT_VERIFIED",
                    "message": "Please verify your email before logging in",
                },
                "emailNotVerified": true,
            })),
        )
            .into_response(),
    };
    Ok(response)
}

#[derive(Deserialize)]
struct VerifyQuery {
    token: Option<String>,
}

async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest("Verification token is required".to_string()))?;

    state.auth_service.verify_email(&token).await?;
    Ok(message("Email verified successfully"))
}

#[derive(Deserialize, Validate)]
struct ResendRequest {
    #[validate(email)]
    email: String,
}

async fn resend_verification(
    State(state): State<AppState>,
    Json(req): Json<ResendRequest>,
) -> AppResult<ApiResponse<serde_json::Value>> {
    req.validate()?;
    state.auth_service.resend_verification(&req.email).await?;
    Ok(message("Verification email sent"))
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    user: UserSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

/// Session validity. The ban check already ran in the auth middleware.
async fn status(session: Session) -> ApiResponse<StatusResponse> {
    ApiResponse::ok(StatusResponse {
        status: "active",
        message: session
            .ban_lifted
            .then_some("Your ban has expired and access has been restored"),
        user: session.user.into(),
    })
}

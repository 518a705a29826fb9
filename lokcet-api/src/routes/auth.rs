use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use lokcet_shared::clients::push::{notify_user, PushData};
use lokcet_shared::errors::{AppError, AppResult, ErrorCode};
use lokcet_shared::types::auth::{AuthUser, TokenPair};
use lokcet_shared::types::ApiResponse;
use lokcet_social::SignUp;

use crate::AppState;

pub(crate) fn validated<T: Validate>(req: &T) -> AppResult<()> {
    req.validate()
        .map_err(|e| AppError::new(ErrorCode::ValidationError, e.to_string()))
}

// --- POST /auth/sign-up ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    #[validate(email(message = "invalid email format"))]
    pub email: String,
    pub password: String,
    #[validate(length(min = 1, max = 50, message = "first name is required"))]
    pub first_name: String,
    #[validate(length(max = 50))]
    #[serde(default)]
    pub last_name: String,
    #[validate(length(min = 9, max = 15, message = "invalid phone number"))]
    pub phone: String,
}

pub async fn sign_up(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignUpRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<TokenPair>>)> {
    validated(&req)?;
    let tokens = state
        .accounts
        .sign_up(SignUp {
            email: req.email,
            password: req.password,
            first_name: req.first_name,
            last_name: req.last_name,
            phone: req.phone,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(tokens))))
}

// --- POST /auth/sign-in ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    #[validate(email(message = "invalid email format"))]
    pub email: String,
    pub password: String,
    pub fcm_token: Option<String>,
}

pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignInRequest>,
) -> AppResult<Json<ApiResponse<TokenPair>>> {
    validated(&req)?;
    let tokens = state
        .accounts
        .sign_in(&req.email, &req.password, req.fcm_token.as_deref())
        .await?;
    Ok(Json(ApiResponse::ok(tokens)))
}

// --- POST /auth/refresh ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> AppResult<Json<ApiResponse<TokenPair>>> {
    let tokens = state.accounts.refresh(&req.refresh_token).await?;
    Ok(Json(ApiResponse::ok(tokens)))
}

// --- POST /auth/sign-out ---

pub async fn sign_out(user: AuthUser, State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<&'static str>>> {
    state.accounts.sign_out(&user.id).await?;
    Ok(Json(ApiResponse::ok("signed out")))
}

// --- POST /auth/password-reset ---

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "invalid email format"))]
    pub email: String,
}

/// The code is pushed to the account's registered device. The response is
/// the same whether or not the email exists.
pub async fn request_password_reset(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ForgotPasswordRequest>,
) -> AppResult<Json<ApiResponse<&'static str>>> {
    validated(&req)?;
    match state.accounts.request_password_reset(&req.email).await {
        Ok(reset) => {
            let data = PushData {
                kind: "password_reset".to_string(),
                sender_id: reset.user_id.clone(),
                message: Some(reset.code.clone()),
                image_url: None,
            };
            notify_user(
                state.store.as_ref(),
                state.notifier.as_ref(),
                &reset.user_id,
                "Lokcet",
                &format!("Mã đặt lại mật khẩu của bạn: {}", reset.code),
                data,
            )
            .await;
        }
        Err(e) if e.code() == ErrorCode::UserNotFound => {
            tracing::debug!("password reset requested for unknown email");
        }
        Err(e) => return Err(e),
    }
    Ok(Json(ApiResponse::ok("if the email exists, a reset code has been sent")))
}

// --- POST /auth/password-reset/confirm ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[validate(email(message = "invalid email format"))]
    pub email: String,
    #[validate(length(equal = 6, message = "code must have 6 digits"))]
    pub code: String,
    pub new_password: String,
}

pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetPasswordRequest>,
) -> AppResult<Json<ApiResponse<&'static str>>> {
    validated(&req)?;
    state
        .accounts
        .reset_password(&req.email, &req.code, &req.new_password)
        .await?;
    Ok(Json(ApiResponse::ok("password updated")))
}

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use lokcet_shared::errors::AppResult;
use lokcet_shared::types::auth::AuthUser;
use lokcet_shared::types::ApiResponse;
use lokcet_social::models::{Problem, Suggestion};
use lokcet_social::Attachment;

use super::auth::validated;
use super::form::Form;
use crate::AppState;

// --- POST /feedback/problems ---

/// Multipart fields: `content` and an optional screenshot in `file`.
pub async fn report_problem(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<ApiResponse<Problem>>)> {
    let form = Form::read(multipart).await?;
    let content = form.text("content").unwrap_or_default().to_string();
    let attachment = form.file.map(|file| Attachment {
        bytes: file.bytes,
        content_type: file.content_type,
    });
    let problem = state.feedback.report_problem(&user.id, &content, attachment).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(problem))))
}

// --- POST /feedback/suggestions ---

#[derive(Debug, Deserialize, Validate)]
pub struct SuggestionRequest {
    #[validate(length(max = 2000))]
    pub content: String,
}

pub async fn send_suggestion(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SuggestionRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Suggestion>>)> {
    validated(&req)?;
    let suggestion = state.feedback.send_suggestion(&user.id, &req.content).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(suggestion))))
}

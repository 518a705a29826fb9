use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use lokcet_feed::models::EmojiReaction;
use lokcet_shared::errors::AppResult;
use lokcet_shared::types::auth::AuthUser;
use lokcet_shared::types::ApiResponse;

use super::auth::validated;
use super::chat::friend_ids;
use crate::AppState;

// --- POST /feed/images/:id/reactions ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRequest {
    #[validate(length(min = 1, max = 32, message = "emoji is required"))]
    pub emoji_id: String,
}

/// 201 on a new reaction, 200 when the same reaction already existed.
pub async fn add_reaction(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<String>,
    Json(req): Json<ReactionRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<EmojiReaction>>)> {
    validated(&req)?;
    let friends = friend_ids(&state, &user.id).await?;
    let outcome = state
        .feed
        .add_emoji_reaction(&user.id, &friends, &image_id, &req.emoji_id)
        .await?;
    let status = if outcome.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(ApiResponse::ok(outcome.reaction))))
}

// --- GET /feed/images/:id/reactions ---

pub async fn list_reactions(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<EmojiReaction>>>> {
    let reactions = state.feed.reactions_for_image(&user.id, &image_id).await?;
    Ok(Json(ApiResponse::ok(reactions)))
}

// --- POST /feed/images/:id/reactions/viewed ---

#[derive(Debug, Serialize)]
pub struct ViewedResponse {
    pub updated: usize,
}

pub async fn mark_viewed(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<String>,
) -> AppResult<Json<ApiResponse<ViewedResponse>>> {
    let updated = state.feed.mark_reactions_viewed(&user.id, &image_id).await?;
    Ok(Json(ApiResponse::ok(ViewedResponse { updated })))
}

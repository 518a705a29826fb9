use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use lokcet_feed::models::{UploadImage, Visibility};
use lokcet_feed::NewImage;
use lokcet_shared::errors::AppResult;
use lokcet_shared::types::auth::AuthUser;
use lokcet_shared::types::{ApiResponse, Paginated, PaginationParams};

use super::chat::friend_ids;
use super::form::Form;
use crate::AppState;

// --- POST /feed/images ---

/// Multipart fields: `file`, optional `caption`, optional `visibleTo`
/// (repeated or comma-separated user IDs; absent means all friends).
pub async fn upload_image(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<ApiResponse<UploadImage>>)> {
    let mut form = Form::read(multipart).await?;
    let file = form.take_file()?;
    let visibility = Visibility::from_ids(form.list("visibleTo"));
    let caption = form.text("caption").unwrap_or_default().to_string();

    let image = state
        .feed
        .upload_image(
            &user.id,
            NewImage {
                bytes: file.bytes,
                content_type: file.content_type,
                caption,
                visibility,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(image))))
}

// --- GET /feed ---

pub async fn list_feeds(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(page): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<UploadImage>>>> {
    let friends = friend_ids(&state, &user.id).await?;
    let feed = state.feed.list_feeds(&user.id, &friends, &page).await?;
    Ok(Json(ApiResponse::ok(feed)))
}

// --- GET /feed/images/:id ---

pub async fn get_image(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<String>,
) -> AppResult<Json<ApiResponse<UploadImage>>> {
    let friends = friend_ids(&state, &user.id).await?;
    let image = state.feed.visible_image(&user.id, &friends, &image_id).await?;
    Ok(Json(ApiResponse::ok(image)))
}

// --- DELETE /feed/images/:id ---

pub async fn delete_image(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<String>,
) -> AppResult<Json<ApiResponse<&'static str>>> {
    state.feed.delete_image(&user.id, &image_id).await?;
    Ok(Json(ApiResponse::ok("image deleted")))
}

// --- GET /feed/new-count ---

#[derive(Debug, Serialize)]
pub struct NewFeedCount {
    pub count: u64,
}

pub async fn new_feed_count(user: AuthUser, State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<NewFeedCount>>> {
    let friends = friend_ids(&state, &user.id).await?;
    let count = state.feed.new_feed_count(&user.id, &friends).await?;
    Ok(Json(ApiResponse::ok(NewFeedCount { count })))
}

// --- POST /feed/checked ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub server_time: i64,
}

pub async fn mark_feeds_checked(user: AuthUser, State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<ServerTime>>> {
    let checked_at = state.feed.mark_feeds_checked(&user.id).await?;
    Ok(Json(ApiResponse::ok(ServerTime {
        server_time: checked_at.timestamp_millis(),
    })))
}

// --- GET /server-time ---

pub async fn server_time(State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<ServerTime>>> {
    let now = state.feed.server_time().await?;
    Ok(Json(ApiResponse::ok(ServerTime {
        server_time: now.timestamp_millis(),
    })))
}

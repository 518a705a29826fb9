use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use lokcet_messaging::models::{ChatRoom, Message};
use lokcet_messaging::room_id;
use lokcet_shared::errors::{AppError, AppResult, ErrorCode};
use lokcet_shared::types::auth::AuthUser;
use lokcet_shared::types::ApiResponse;
use lokcet_social::models::FriendRelation;

use super::sse;
use crate::AppState;

async fn member_room(state: &AppState, user_id: &str, room_id: &str) -> AppResult<ChatRoom> {
    let room = state.messaging.get_chat_room(room_id).await?;
    if !room.members.iter().any(|m| m == user_id) {
        return Err(AppError::new(ErrorCode::NotRoomMember, "not a member of this chat room"));
    }
    Ok(room)
}

pub(crate) async fn friend_ids(state: &AppState, user_id: &str) -> AppResult<Vec<String>> {
    Ok(state.accounts.get_user(user_id).await?.friends)
}

async fn friend_room_ids(state: &AppState, user_id: &str) -> AppResult<Vec<String>> {
    let friends = friend_ids(state, user_id).await?;
    Ok(friends.iter().map(|friend| room_id(user_id, friend)).collect())
}

// --- POST /chatrooms ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub peer_id: String,
}

pub async fn create_room(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRoomRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<ChatRoom>>)> {
    if state.relationships.relation(&user.id, &req.peer_id).await? != FriendRelation::Friends {
        return Err(AppError::new(ErrorCode::NotFriends, "chat rooms are only open between friends"));
    }
    let room = state.messaging.create_chat_room(&user.id, &req.peer_id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(room))))
}

// --- GET /chatrooms/:id ---

pub async fn get_room(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<ApiResponse<ChatRoom>>> {
    let room = member_room(&state, &user.id, &room_id).await?;
    Ok(Json(ApiResponse::ok(room)))
}

// --- GET /chatrooms/:id/messages ---

pub async fn messages(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<Message>>>> {
    member_room(&state, &user.id, &room_id).await?;
    let messages = state.messaging.messages(&room_id).await?;
    Ok(Json(ApiResponse::ok(messages)))
}

// --- POST /chatrooms/:id/messages ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    /// Feed image the message replies to. The snapshot is taken server-side.
    pub reply_to_image_id: Option<String>,
}

pub async fn send_message(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Message>>)> {
    let room = member_room(&state, &user.id, &room_id).await?;
    let receiver_id = room
        .peer_of(&user.id)
        .ok_or_else(|| AppError::bad_request("chat room has no other member"))?;

    let message = match req.reply_to_image_id {
        Some(image_id) => {
            let friends = friend_ids(&state, &user.id).await?;
            let reply = state.feed.reply_snapshot(&user.id, &friends, &image_id).await?;
            state
                .messaging
                .send_reply_message(&user.id, receiver_id, &req.content, reply)
                .await?
        }
        None => state.messaging.send_message(&user.id, receiver_id, &req.content).await?,
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(message))))
}

// --- POST /chatrooms/:id/seen ---

#[derive(Debug, Serialize)]
pub struct SeenResponse {
    pub updated: bool,
}

pub async fn mark_seen(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<ApiResponse<SeenResponse>>> {
    member_room(&state, &user.id, &room_id).await?;
    let updated = state.messaging.mark_last_message_as_seen(&user.id, &room_id).await?;
    Ok(Json(ApiResponse::ok(SeenResponse { updated })))
}

// --- GET /chatrooms/unseen-count ---

#[derive(Debug, Serialize)]
pub struct UnseenResponse {
    pub rooms: usize,
}

pub async fn unseen_count(user: AuthUser, State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<UnseenResponse>>> {
    let rooms = friend_room_ids(&state, &user.id).await?;
    let rooms = state.messaging.unseen_count(&user.id, &rooms).await?;
    Ok(Json(ApiResponse::ok(UnseenResponse { rooms })))
}

// --- SSE ---

pub async fn rooms_stream(user: AuthUser, State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    let friends = friend_ids(&state, &user.id).await?;
    let updates = state.messaging.chat_room_list(&user.id, friends);
    Ok(sse::live("chatrooms", updates, state.shutdown.child_token()))
}

pub async fn messages_stream(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    member_room(&state, &user.id, &room_id).await?;
    let updates = state.messaging.message_list(&room_id);
    Ok(sse::live("messages", updates, state.shutdown.child_token()))
}

pub async fn latest_stream(user: AuthUser, State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    let rooms = friend_room_ids(&state, &user.id).await?;
    let updates = state.messaging.latest_messages(rooms);
    Ok(sse::live("latest", updates, state.shutdown.child_token()))
}

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;

use lokcet_shared::errors::AppResult;
use lokcet_shared::types::auth::AuthUser;
use lokcet_shared::types::ApiResponse;
use lokcet_social::models::{Location, User, UserSummary};
use lokcet_social::{FriendListKind, FriendSuggestion};

use super::sse;
use crate::AppState;

fn summaries(users: Vec<User>) -> Vec<UserSummary> {
    users.iter().map(UserSummary::from).collect()
}

fn summary_stream(users: BoxStream<'static, AppResult<Vec<User>>>) -> BoxStream<'static, AppResult<Vec<UserSummary>>> {
    users.map(|update| update.map(summaries)).boxed()
}

// --- GET /friends, /friends/requests, /friends/waiting ---

async fn list(state: &AppState, user_id: &str, kind: FriendListKind) -> AppResult<Json<ApiResponse<Vec<UserSummary>>>> {
    let users = state.relationships.list(user_id, kind).await?;
    Ok(Json(ApiResponse::ok(summaries(users))))
}

pub async fn friends(user: AuthUser, State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<Vec<UserSummary>>>> {
    list(&state, &user.id, FriendListKind::Friends).await
}

pub async fn requests(user: AuthUser, State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<Vec<UserSummary>>>> {
    list(&state, &user.id, FriendListKind::Requests).await
}

pub async fn waiting(user: AuthUser, State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<Vec<UserSummary>>>> {
    list(&state, &user.id, FriendListKind::Waiting).await
}

// --- Transitions ---

pub async fn add_friend(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(friend_id): Path<String>,
) -> AppResult<Json<ApiResponse<&'static str>>> {
    state.relationships.add_friend(&user.id, &friend_id).await?;
    Ok(Json(ApiResponse::ok("request sent")))
}

pub async fn accept_friend(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(friend_id): Path<String>,
) -> AppResult<Json<ApiResponse<&'static str>>> {
    state.relationships.accept_friend(&user.id, &friend_id).await?;
    Ok(Json(ApiResponse::ok("request accepted")))
}

pub async fn reject_friend(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(friend_id): Path<String>,
) -> AppResult<Json<ApiResponse<&'static str>>> {
    state.relationships.reject_friend(&user.id, &friend_id).await?;
    Ok(Json(ApiResponse::ok("request rejected")))
}

pub async fn cancel_request(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(friend_id): Path<String>,
) -> AppResult<Json<ApiResponse<&'static str>>> {
    state.relationships.remove_waited_friend(&user.id, &friend_id).await?;
    Ok(Json(ApiResponse::ok("request cancelled")))
}

pub async fn remove_friend(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(friend_id): Path<String>,
) -> AppResult<Json<ApiResponse<&'static str>>> {
    state.relationships.remove_friend(&user.id, &friend_id).await?;
    Ok(Json(ApiResponse::ok("friend removed")))
}

// --- Suggestions ---

#[derive(Debug, Deserialize)]
pub struct SuggestionsRequest {
    #[serde(default)]
    pub contacts: Vec<String>,
    pub location: Option<Location>,
}

pub async fn suggestions(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SuggestionsRequest>,
) -> AppResult<Json<ApiResponse<Vec<FriendSuggestion>>>> {
    let suggestions = state
        .relationships
        .suggestions(&user.id, &req.contacts, req.location)
        .await?;
    Ok(Json(ApiResponse::ok(suggestions)))
}

/// Query form of [`SuggestionsRequest`]: `contacts` is comma-separated.
#[derive(Debug, Deserialize)]
pub struct SuggestionsQuery {
    pub contacts: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl SuggestionsQuery {
    fn contacts(&self) -> Vec<String> {
        self.contacts
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn location(&self) -> Option<Location> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Location { latitude, longitude }),
            _ => None,
        }
    }
}

// --- SSE ---

pub async fn friends_stream(user: AuthUser, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let updates = summary_stream(state.relationships.friend_list(&user.id));
    sse::live("friends", updates, state.shutdown.child_token())
}

pub async fn requests_stream(user: AuthUser, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let updates = summary_stream(state.relationships.request_friend_list(&user.id));
    sse::live("requests", updates, state.shutdown.child_token())
}

pub async fn waiting_stream(user: AuthUser, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let updates = summary_stream(state.relationships.waited_friend_list(&user.id));
    sse::live("waiting", updates, state.shutdown.child_token())
}

pub async fn suggestions_stream(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<SuggestionsQuery>,
) -> impl IntoResponse {
    let updates = state
        .relationships
        .suggest_friend_list(&user.id, query.contacts(), query.location());
    sse::live("suggestions", updates, state.shutdown.child_token())
}

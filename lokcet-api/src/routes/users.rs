use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use lokcet_shared::errors::AppResult;
use lokcet_shared::types::auth::AuthUser;
use lokcet_shared::types::ApiResponse;
use lokcet_social::models::{FriendRelation, Location, User, UserSummary};

use super::auth::validated;
use super::form::Form;
use crate::AppState;

// --- GET /me ---

pub async fn me(user: AuthUser, State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<User>>> {
    let me = state.accounts.get_user(&user.id).await?;
    Ok(Json(ApiResponse::ok(me)))
}

// --- PATCH /me ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 50, message = "first name is required"))]
    pub first_name: String,
    #[validate(length(max = 50))]
    #[serde(default)]
    pub last_name: String,
}

pub async fn update_profile(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateProfileRequest>,
) -> AppResult<Json<ApiResponse<User>>> {
    validated(&req)?;
    let updated = state
        .accounts
        .update_profile(&user.id, &req.first_name, &req.last_name)
        .await?;
    Ok(Json(ApiResponse::ok(updated)))
}

// --- DELETE /me ---

pub async fn delete_account(user: AuthUser, State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<&'static str>>> {
    state.accounts.delete_account(&user.id).await?;
    Ok(Json(ApiResponse::ok("account deleted")))
}

// --- PUT /me/avatar ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarResponse {
    pub profile_picture: String,
}

pub async fn update_avatar(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> AppResult<Json<ApiResponse<AvatarResponse>>> {
    let file = Form::read(multipart).await?.take_file()?;

    let profile_picture = state
        .accounts
        .update_avatar(&user.id, file.bytes, &file.content_type)
        .await?;
    Ok(Json(ApiResponse::ok(AvatarResponse { profile_picture })))
}

// --- PUT /me/location ---

#[derive(Debug, Deserialize, Validate)]
pub struct LocationRequest {
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
}

pub async fn update_location(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<LocationRequest>,
) -> AppResult<Json<ApiResponse<Location>>> {
    validated(&req)?;
    let location = Location {
        latitude: req.latitude,
        longitude: req.longitude,
    };
    state.accounts.update_location(&user.id, location).await?;
    Ok(Json(ApiResponse::ok(location)))
}

// --- PUT /me/fcm-token ---

#[derive(Debug, Deserialize, Validate)]
pub struct FcmTokenRequest {
    #[validate(length(min = 1, message = "token is required"))]
    pub token: String,
}

pub async fn update_fcm_token(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<FcmTokenRequest>,
) -> AppResult<Json<ApiResponse<&'static str>>> {
    validated(&req)?;
    state.accounts.update_fcm_token(&user.id, &req.token).await?;
    Ok(Json(ApiResponse::ok("token updated")))
}

// --- GET /me/invite-link ---

#[derive(Debug, Serialize)]
pub struct InviteLinkResponse {
    pub link: String,
}

pub async fn invite_link(user: AuthUser, State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<InviteLinkResponse>>> {
    let link = state.accounts.invite_link(&user.id).await?;
    Ok(Json(ApiResponse::ok(InviteLinkResponse { link })))
}

// --- GET /users/:id ---

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub user: UserSummary,
    pub relation: FriendRelation,
}

pub async fn get_profile(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(other_id): Path<String>,
) -> AppResult<Json<ApiResponse<ProfileResponse>>> {
    let other = state.accounts.get_user(&other_id).await?;
    let relation = if other_id == user.id {
        FriendRelation::None
    } else {
        state.relationships.relation(&user.id, &other_id).await?
    };
    Ok(Json(ApiResponse::ok(ProfileResponse {
        user: UserSummary::from(&other),
        relation,
    })))
}

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use serde_json::json;

use lokcet_messaging::{room_id, MessagingService};
use lokcet_shared::clients::blob::{generate_key, image_extension, BlobStore, PROFILE_IMAGES_PREFIX};
use lokcet_shared::clients::push::FcmToken;
use lokcet_shared::collections::{self, CREDENTIALS, FCM_TOKENS, USERS};
use lokcet_shared::errors::{AppError, AppResult, ErrorCode};
use lokcet_shared::store::{to_document, DocumentStore, DocumentStoreExt, FieldUpdate, Query, WriteBatch};
use lokcet_shared::types::{now_millis, TokenPair};

use super::password::{generate_reset_code, hash_password, validate_password, verify_password};
use super::relationship::user_path;
use super::tokens::{create_token_pair, hash_token};
use super::{fetch_user, load_user};
use crate::geo::normalize_phone;
use crate::models::{Credential, Location, User};

const RESET_CODE_TTL_MINUTES: i64 = 15;
/// Wrong guesses tolerated before an issued reset code is discarded.
pub const MAX_RESET_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub secret: String,
    pub access_ttl_secs: i64,
}

/// A freshly issued password-reset code and the account it belongs to.
#[derive(Debug, Clone)]
pub struct ResetCode {
    pub user_id: String,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}

/// Identity, profile and device-token operations.
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    messaging: MessagingService,
    jwt: JwtSettings,
    invite_base_url: String,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        messaging: MessagingService,
        jwt: JwtSettings,
        invite_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            blobs,
            messaging,
            jwt,
            invite_base_url: invite_base_url.into(),
        }
    }

    // --- Sign-up / sign-in ---

    pub async fn sign_up(&self, req: SignUp) -> AppResult<TokenPair> {
        validate_password(&req.password)?;
        let email = normalize_email(&req.email);
        if !email.contains('@') {
            return Err(AppError::Validation("invalid email address".into()));
        }
        if self.find_credential(&email).await?.is_some() {
            return Err(AppError::new(ErrorCode::EmailAlreadyExists, "email is already registered"));
        }
        let phone = normalize_phone(&req.phone);
        if !phone.is_empty() {
            let query = Query::new(collections::collection(USERS))
                .where_eq("phone", phone.as_str())
                .where_eq("isDeleted", false)
                .limit(1);
            if self.store.count(&query).await? > 0 {
                return Err(AppError::new(ErrorCode::PhoneAlreadyExists, "phone number is already registered"));
            }
        }

        let user_id = self.store.new_id();
        let (tokens, refresh_hash) = create_token_pair(&user_id, &self.jwt.secret, self.jwt.access_ttl_secs)?;
        let credential = Credential {
            user_id: user_id.clone(),
            email: email.clone(),
            password_hash: hash_password(&req.password)?,
            refresh_token_hash: Some(refresh_hash),
            reset_code_hash: None,
            reset_expires_at: None,
            reset_attempts: 0,
        };
        let user = User {
            id: user_id.clone(),
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            email,
            phone,
            created_at: now_millis(),
            ..User::default()
        };

        let batch = WriteBatch::new()
            .create(collections::doc(CREDENTIALS, &user_id), to_document(&credential)?)
            .create(user_path(&user_id), to_document(&user)?);
        self.store.commit(batch).await?;

        metrics::counter!("account_events_total", "event" => "sign_up").increment(1);
        tracing::info!(user_id = %user_id, "account created");
        Ok(tokens)
    }

    pub async fn sign_in(&self, email: &str, password: &str, fcm_token: Option<&str>) -> AppResult<TokenPair> {
        let invalid = || AppError::new(ErrorCode::InvalidCredentials, "invalid email or password");
        let credential = self.find_credential(&normalize_email(email)).await?.ok_or_else(invalid)?;
        if !verify_password(password, &credential.password_hash)? {
            tracing::info!(user_id = %credential.user_id, "sign-in rejected");
            return Err(invalid());
        }
        match fetch_user(&self.store, &credential.user_id).await? {
            Some(user) if !user.is_deleted => {}
            _ => return Err(AppError::new(ErrorCode::AccountDeleted, "account has been deleted")),
        }

        let user_id = credential.user_id;
        let (tokens, refresh_hash) = create_token_pair(&user_id, &self.jwt.secret, self.jwt.access_ttl_secs)?;
        let mut batch = WriteBatch::new().update(
            collections::doc(CREDENTIALS, &user_id),
            vec![FieldUpdate::set("refreshTokenHash", refresh_hash)],
        );
        if let Some(token) = fcm_token.filter(|t| !t.is_empty()) {
            batch = batch.set(collections::doc(FCM_TOKENS, &user_id), fcm_document(&user_id, token)?);
        }
        self.store.commit(batch).await?;

        metrics::counter!("account_events_total", "event" => "sign_in").increment(1);
        tracing::info!(user_id = %user_id, "signed in");
        Ok(tokens)
    }

    /// Exchanges a refresh token for a new pair. The old refresh token stops
    /// working.
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<TokenPair> {
        let query = Query::new(collections::collection(CREDENTIALS))
            .where_eq("refreshTokenHash", hash_token(refresh_token))
            .limit(1);
        let credential = self
            .store
            .query_as::<Credential>(&query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::new(ErrorCode::TokenInvalid, "invalid refresh token"))?;
        load_user(&self.store, &credential.user_id)
            .await
            .map_err(|_| AppError::new(ErrorCode::AccountDeleted, "account has been deleted"))?;

        let (tokens, refresh_hash) =
            create_token_pair(&credential.user_id, &self.jwt.secret, self.jwt.access_ttl_secs)?;
        self.store
            .update(
                &collections::doc(CREDENTIALS, &credential.user_id),
                vec![FieldUpdate::set("refreshTokenHash", refresh_hash)],
            )
            .await?;
        tracing::debug!(user_id = %credential.user_id, "tokens refreshed");
        Ok(tokens)
    }

    /// Forgets the device token and the refresh token.
    pub async fn sign_out(&self, user_id: &str) -> AppResult<()> {
        let credential_path = collections::doc(CREDENTIALS, user_id);
        let mut batch = WriteBatch::new().delete(collections::doc(FCM_TOKENS, user_id));
        if self.store.get(&credential_path).await?.is_some() {
            batch = batch.update(credential_path, vec![FieldUpdate::delete("refreshTokenHash")]);
        }
        self.store.commit(batch).await?;
        tracing::info!(user_id = %user_id, "signed out");
        Ok(())
    }

    pub async fn update_fcm_token(&self, user_id: &str, token: &str) -> AppResult<()> {
        self.store
            .set(&collections::doc(FCM_TOKENS, user_id), fcm_document(user_id, token)?)
            .await?;
        tracing::debug!(user_id = %user_id, "push token updated");
        Ok(())
    }

    // --- Password reset ---

    /// Issues a reset code for out-of-band delivery. Only its hash is stored.
    pub async fn request_password_reset(&self, email: &str) -> AppResult<ResetCode> {
        let credential = self
            .find_credential(&normalize_email(email))
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "no account for this email"))?;

        let code = generate_reset_code();
        let expires_at = now_millis() + Duration::minutes(RESET_CODE_TTL_MINUTES);
        self.store
            .update(
                &collections::doc(CREDENTIALS, &credential.user_id),
                vec![
                    FieldUpdate::set("resetCodeHash", hash_token(&code)),
                    FieldUpdate::set("resetExpiresAt", expires_at.timestamp_millis()),
                    FieldUpdate::set("resetAttempts", 0),
                ],
            )
            .await?;

        tracing::info!(user_id = %credential.user_id, "password reset requested");
        Ok(ResetCode {
            user_id: credential.user_id,
            code,
        })
    }

    pub async fn reset_password(&self, email: &str, code: &str, new_password: &str) -> AppResult<()> {
        let invalid = || AppError::new(ErrorCode::ResetCodeInvalid, "invalid reset code");
        let credential = self.find_credential(&normalize_email(email)).await?.ok_or_else(invalid)?;
        let (Some(expected), Some(expires_at)) = (&credential.reset_code_hash, credential.reset_expires_at) else {
            return Err(invalid());
        };
        if expires_at < now_millis() {
            return Err(AppError::new(ErrorCode::ResetCodeExpired, "reset code has expired"));
        }
        if *expected != hash_token(code) {
            self.record_failed_reset(&credential).await?;
            return Err(invalid());
        }
        validate_password(new_password)?;

        self.store
            .update(
                &collections::doc(CREDENTIALS, &credential.user_id),
                vec![
                    FieldUpdate::set("passwordHash", hash_password(new_password)?),
                    FieldUpdate::delete("resetCodeHash"),
                    FieldUpdate::delete("resetExpiresAt"),
                    FieldUpdate::delete("resetAttempts"),
                    FieldUpdate::delete("refreshTokenHash"),
                ],
            )
            .await?;

        tracing::info!(user_id = %credential.user_id, "password reset");
        Ok(())
    }

    /// Counts a wrong guess and discards the code once the limit is reached.
    async fn record_failed_reset(&self, credential: &Credential) -> AppResult<()> {
        let path = collections::doc(CREDENTIALS, &credential.user_id);
        let updates = if credential.reset_attempts + 1 >= MAX_RESET_ATTEMPTS {
            tracing::warn!(user_id = %credential.user_id, "reset code discarded after repeated failures");
            vec![
                FieldUpdate::delete("resetCodeHash"),
                FieldUpdate::delete("resetExpiresAt"),
                FieldUpdate::delete("resetAttempts"),
            ]
        } else {
            vec![FieldUpdate::increment("resetAttempts", 1)]
        };
        self.store.update(&path, updates).await?;
        Ok(())
    }

    // --- Deletion ---

    /// Removes the user from every counterpart list, deletes the chat rooms
    /// with each friend, drops credentials and device token, and overwrites
    /// the user document with an empty soft-deleted one. One batch.
    pub async fn delete_account(&self, user_id: &str) -> AppResult<()> {
        let me = load_user(&self.store, user_id).await?;

        let counterparts: HashSet<&String> = me
            .friends
            .iter()
            .chain(&me.friend_wait_list)
            .chain(&me.friend_requests)
            .collect();
        let reads = counterparts.iter().map(|id| fetch_user(&self.store, id));
        let existing: HashSet<String> = futures::future::try_join_all(reads)
            .await?
            .into_iter()
            .flatten()
            .map(|u| u.id)
            .collect();

        let mut batch = WriteBatch::new();
        let lists = [
            (&me.friends, "friends"),
            (&me.friend_wait_list, "friendRequests"),
            (&me.friend_requests, "friendWaitList"),
        ];
        for (ids, their_field) in lists {
            for id in ids.iter().filter(|id| existing.contains(*id)) {
                batch = batch.update(user_path(id), vec![FieldUpdate::array_remove(their_field, [user_id])]);
            }
        }
        for friend_id in &me.friends {
            batch = batch.extend(self.messaging.chat_room_deletion(&room_id(user_id, friend_id)).await?);
        }

        let tombstone = User {
            id: me.id.clone(),
            is_deleted: true,
            created_at: me.created_at,
            ..User::default()
        };
        batch = batch
            .delete(collections::doc(FCM_TOKENS, user_id))
            .delete(collections::doc(CREDENTIALS, user_id))
            .set(user_path(user_id), to_document(&tombstone)?);
        self.store.commit(batch).await?;
        for friend_id in &me.friends {
            self.messaging.sweep_deleted_room(&room_id(user_id, friend_id)).await?;
        }

        metrics::counter!("account_events_total", "event" => "delete").increment(1);
        tracing::info!(user_id = %user_id, friends = me.friends.len(), "account deleted");
        Ok(())
    }

    // --- Profile ---

    pub async fn get_user(&self, user_id: &str) -> AppResult<User> {
        load_user(&self.store, user_id).await
    }

    pub async fn update_profile(&self, user_id: &str, first_name: &str, last_name: &str) -> AppResult<User> {
        load_user(&self.store, user_id).await?;
        self.store
            .update(
                &user_path(user_id),
                vec![
                    FieldUpdate::set("firstName", first_name.trim()),
                    FieldUpdate::set("lastName", last_name.trim()),
                ],
            )
            .await?;
        load_user(&self.store, user_id).await
    }

    /// Stores a new profile picture under `profileImages/` and returns its URL.
    pub async fn update_avatar(&self, user_id: &str, bytes: Vec<u8>, content_type: &str) -> AppResult<String> {
        load_user(&self.store, user_id).await?;
        let extension = image_extension(content_type).ok_or_else(|| {
            AppError::new(ErrorCode::UnsupportedImageFormat, format!("unsupported image type {content_type}"))
        })?;
        let key = generate_key(PROFILE_IMAGES_PREFIX, extension);
        let url = self.blobs.upload(&key, bytes, content_type).await?;
        self.store
            .update(&user_path(user_id), vec![FieldUpdate::set("profilePicture", url.as_str())])
            .await?;
        tracing::info!(user_id = %user_id, key = %key, "avatar updated");
        Ok(url)
    }

    pub async fn update_location(&self, user_id: &str, location: Location) -> AppResult<()> {
        load_user(&self.store, user_id).await?;
        self.store
            .update(
                &user_path(user_id),
                vec![FieldUpdate::set(
                    "location",
                    json!({ "latitude": location.latitude, "longitude": location.longitude }),
                )],
            )
            .await?;
        Ok(())
    }

    /// Deep link that opens the friend-invite flow for `user_id`.
    pub async fn invite_link(&self, user_id: &str) -> AppResult<String> {
        load_user(&self.store, user_id).await?;
        Ok(format!("{}/invite?uid={user_id}", self.invite_base_url.trim_end_matches('/')))
    }

    async fn find_credential(&self, email: &str) -> AppResult<Option<Credential>> {
        let query = Query::new(collections::collection(CREDENTIALS))
            .where_eq("email", email)
            .limit(1);
        Ok(self.store.query_as::<Credential>(&query).await?.into_iter().next())
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn fcm_document(user_id: &str, token: &str) -> AppResult<serde_json::Value> {
    Ok(to_document(&FcmToken {
        user_id: user_id.to_string(),
        token: token.to_string(),
    })?)
}

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Issuer stamped into and required from every access token.
pub const TOKEN_ISSUER: &str = "lokcet";

/// Access-token claims. `sub` is the user document ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

impl Claims {
    pub fn access(user_id: impl Into<String>, ttl_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: user_id.into(),
            iss: TOKEN_ISSUER.to_string(),
            iat: now,
            exp: now + ttl_secs,
            jti: Uuid::now_v7(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

/// The signed-in user, extracted from the bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self { id: claims.sub }
    }
}

/// Returned by sign-up, sign-in and refresh. The refresh token is opaque and
/// only its hash is stored on the user document.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenPair {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl TokenPair {
    pub fn bearer(user_id: &str, access_token: String, refresh_token: String, expires_in: i64) -> Self {
        Self {
            user_id: user_id.to_string(),
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in,
        }
    }
}

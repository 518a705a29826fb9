use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::errors::{AppError, ErrorCode};
use crate::types::auth::{AuthUser, Claims, TOKEN_ISSUER};

pub const DEFAULT_JWT_SECRET: &str = "development-secret-change-in-production";

/// Application state that knows the secret access tokens are signed with.
pub trait TokenSecret {
    fn jwt_secret(&self) -> &str;
}

impl<T: TokenSecret> TokenSecret for Arc<T> {
    fn jwt_secret(&self) -> &str {
        (**self).jwt_secret()
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: TokenSecret + Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)?;
        let claims = validate_jwt(&token, state.jwt_secret())?;

        if claims.is_expired() {
            return Err(AppError::new(ErrorCode::TokenExpired, "token has expired"));
        }

        Ok(AuthUser::from(claims))
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let auth_header = headers
        .get("Authorization")
        .ok_or_else(|| AppError::new(ErrorCode::Unauthorized, "missing authorization header"))?
        .to_str()
        .map_err(|_| AppError::new(ErrorCode::Unauthorized, "invalid authorization header"))?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| AppError::new(ErrorCode::Unauthorized, "authorization header must use Bearer scheme"))
}

pub fn create_jwt(user_id: &str, secret: &str, ttl_secs: i64) -> Result<String, AppError> {
    let claims = Claims::access(user_id, ttl_secs);
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::internal(format!("JWT encoding failed: {e}")))
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.set_issuer(&[TOKEN_ISSUER]);

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::new(ErrorCode::TokenExpired, "token has expired")
        }
        _ => AppError::new(ErrorCode::TokenInvalid, format!("invalid token: {e}")),
    })?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn token_round_trip_keeps_subject() {
        let token = create_jwt("user-1", "secret", 60).unwrap();
        let claims = validate_jwt(&token, "secret").unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.iss, TOKEN_ISSUER);
        assert!(!claims.is_expired());
    }

    #[test]
    fn foreign_issuer_is_rejected() {
        let mut claims = Claims::access("user-1", 60);
        claims.iss = "someone-else".into();
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret")).unwrap();
        assert_eq!(validate_jwt(&token, "secret").unwrap_err().code(), ErrorCode::TokenInvalid);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create_jwt("user-1", "secret", 60).unwrap();
        let err = validate_jwt(&token, "other").unwrap_err();
        assert_eq!(err.code(), ErrorCode::TokenInvalid);
    }

    struct Keys(&'static str);

    impl TokenSecret for Keys {
        fn jwt_secret(&self) -> &str {
            self.0
        }
    }

    async fn extract(state: &Arc<Keys>, token: &str) -> Result<AuthUser, AppError> {
        let (mut parts, _) = axum::http::Request::builder()
            .header("Authorization", format!("Bearer {token}"))
            .body(())
            .unwrap()
            .into_parts();
        AuthUser::from_request_parts(&mut parts, state).await
    }

    #[tokio::test]
    async fn extractor_validates_with_the_state_secret() {
        let state = Arc::new(Keys("rotated-secret"));
        let token = create_jwt("user-1", "rotated-secret", 60).unwrap();
        assert_eq!(extract(&state, &token).await.unwrap().id, "user-1");

        let default_signed = create_jwt("user-1", DEFAULT_JWT_SECRET, 60).unwrap();
        let err = extract(&state, &default_signed).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TokenInvalid);
    }

    #[test]
    fn bearer_scheme_is_required() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_err());
        headers.insert("Authorization", HeaderValue::from_static("Bearer abc"));
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc");
    }
}

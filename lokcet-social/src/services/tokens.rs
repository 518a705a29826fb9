use rand::Rng;
use sha2::{Digest, Sha256};

use lokcet_shared::errors::AppError;
use lokcet_shared::middleware::create_jwt;
use lokcet_shared::types::TokenPair;

pub fn create_refresh_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

/// Hex SHA-256, used for refresh tokens and reset codes at rest.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// A fresh access/refresh pair plus the hash of the refresh token to store.
pub fn create_token_pair(user_id: &str, secret: &str, access_ttl: i64) -> Result<(TokenPair, String), AppError> {
    let access_token = create_jwt(user_id, secret, access_ttl)?;
    let refresh_token = create_refresh_token();
    let refresh_hash = hash_token(&refresh_token);
    let pair = TokenPair::bearer(user_id, access_token, refresh_token, access_ttl);
    Ok((pair, refresh_hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lokcet_shared::middleware::validate_jwt;

    #[test]
    fn pair_carries_a_valid_access_token() {
        let (pair, refresh_hash) = create_token_pair("u1", "secret", 60).unwrap();
        assert_eq!(validate_jwt(&pair.access_token, "secret").unwrap().sub, "u1");
        assert_eq!(hash_token(&pair.refresh_token), refresh_hash);
        assert_eq!(pair.refresh_token.len(), 64);
    }
}

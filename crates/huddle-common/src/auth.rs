//! Shared JWT identity utilities.
//!
//! Session issuance belongs to an external auth service; the relay only needs to
//! validate the bearer token a participant connects with. `issue_token` exists for
//! tooling and tests that stand in for that service.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HuddleError;

/// JWT claims carried by a participant's access token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (participant ID as string)
    pub sub: String,
    /// Display name shown to other participants
    pub name: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// The authenticated identity behind a connection or REST call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub display_name: String,
}

/// Validate and decode a JWT token.
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Validate a token and resolve it to an [`Identity`].
pub fn identify(token: &str, secret: &str) -> Result<Identity, HuddleError> {
    let claims = validate_token(token, secret).map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => HuddleError::TokenExpired,
        _ => HuddleError::InvalidToken,
    })?;

    let user_id = claims
        .sub
        .parse::<Uuid>()
        .map_err(|_| HuddleError::InvalidToken)?;

    Ok(Identity {
        user_id,
        display_name: claims.name,
    })
}

/// Sign an access token for `user_id`.
pub fn issue_token(
    user_id: Uuid,
    display_name: &str,
    secret: &str,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        name: display_name.to_owned(),
        iat: now,
        exp: now + ttl_secs,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_identifies() {
        let uid = Uuid::new_v4();
        let token = issue_token(uid, "Ada", "secret", 60).unwrap();
        let identity = identify(&token, "secret").unwrap();
        assert_eq!(identity.user_id, uid);
        assert_eq!(identity.display_name, "Ada");
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = issue_token(Uuid::new_v4(), "Ada", "secret", 60).unwrap();
        assert!(matches!(identify(&token, "other"), Err(HuddleError::InvalidToken)));
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        // Default validation allows 60s of leeway.
        let token = issue_token(Uuid::new_v4(), "Ada", "secret", -3600).unwrap();
        assert!(matches!(identify(&token, "secret"), Err(HuddleError::TokenExpired)));
    }
}

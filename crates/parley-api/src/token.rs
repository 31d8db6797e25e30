//! Bearer credentials: minted at sign-in, checked on every protected request,
//! revoked at sign-out.
//!
//! A credential is a signed JWT, but the signature alone is not enough: it is
//! only live while the shared cache holds it under the owner's email. Issuing
//! overwrites that entry and revoking deletes it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;
use tracing::warn;

use parley_types::api::Claims;
use parley_types::models::Identity;

use crate::cache::TokenCache;

/// Header carrying the credential.
pub const TOKEN_HEADER: &str = "Token";
/// Required prefix of the header value. Case-sensitive.
pub const BEARER: &str = "Bearer ";
/// Lifetime of a credential and of its cache entry.
pub const TOKEN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing or malformed token header")]
    MissingOrMalformed,
    #[error("invalid token: {0}")]
    InvalidSignature(String),
    #[error("token is not live")]
    Unauthenticated,
    #[error("failed to issue token: {0}")]
    Issue(String),
    #[error("failed to revoke token: {0}")]
    Revoke(String),
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    cache: Arc<dyn TokenCache>,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, cache: Arc<dyn TokenCache>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            cache,
            ttl: TOKEN_EXPIRY,
        }
    }

    /// Mint a credential for `identity` and make it the live one.
    pub async fn issue(&self, identity: &Identity) -> Result<String, AuthError> {
        let claims = Claims {
            sub: identity.id,
            email: identity.email.clone(),
            name: identity.name.clone(),
            exp: (Utc::now().timestamp() as u64 + self.ttl.as_secs()) as usize,
        };

        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AuthError::Issue(e.to_string()))?;

        self.cache
            .set(&identity.email, &token, self.ttl)
            .await
            .map_err(|e| AuthError::Issue(e.to_string()))?;

        Ok(token)
    }

    /// Check a raw `Token` header value and return the claims it carries.
    pub async fn validate(&self, header: Option<&str>) -> Result<Claims, AuthError> {
        let token = header
            .and_then(|value| value.strip_prefix(BEARER))
            .filter(|token| !token.is_empty() && !token.contains(char::is_whitespace))
            .ok_or(AuthError::MissingOrMalformed)?;

        let claims = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|e| AuthError::InvalidSignature(e.to_string()))?
            .claims;

        match self.cache.get(&claims.email).await {
            Ok(Some(live)) if live == token => Ok(claims),
            Ok(_) => Err(AuthError::Unauthenticated),
            Err(e) => {
                warn!(email = %claims.email, "token cache lookup failed: {}", e);
                Err(AuthError::Unauthenticated)
            }
        }
    }

    /// Drop the live credential for `email`. Any token already handed out
    /// stops validating immediately.
    pub async fn revoke(&self, email: &str) -> Result<(), AuthError> {
        self.cache
            .delete(email)
            .await
            .map_err(|e| AuthError::Revoke(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::cache::MemoryCache;

    fn identity(email: &str) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            name: "alice".into(),
            email: email.into(),
        }
    }

    fn issuer() -> (TokenIssuer, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new());
        (TokenIssuer::new("test-secret", cache.clone()), cache)
    }

    fn bearer(token: &str) -> String {
        format!("{}{}", BEARER, token)
    }

    #[tokio::test]
    async fn issued_token_validates() {
        let (issuer, cache) = issuer();
        let alice = identity("a@example.com");
        let token = issuer.issue(&alice).await.unwrap();

        assert_eq!(cache.get("a@example.com").await.unwrap().as_deref(), Some(token.as_str()));

        let claims = issuer.validate(Some(&bearer(&token))).await.unwrap();
        assert_eq!(claims.sub, alice.id);
        assert_eq!(claims.email, "a@example.com");

        let expected_exp = Utc::now().timestamp() as usize + TOKEN_EXPIRY.as_secs() as usize;
        assert!(claims.exp.abs_diff(expected_exp) <= 5);
    }

    #[tokio::test]
    async fn header_shape_is_checked() {
        let (issuer, _) = issuer();
        let token = issuer.issue(&identity("a@example.com")).await.unwrap();

        for header in [
            None,
            Some(String::new()),
            Some(token.clone()),
            Some(format!("bearer {}", token)),
            Some(format!("Bearer{}", token)),
            Some("Bearer ".to_string()),
            Some(format!("Bearer {} extra", token)),
        ] {
            let result = issuer.validate(header.as_deref()).await;
            assert!(
                matches!(result, Err(AuthError::MissingOrMalformed)),
                "{:?} -> {:?}",
                header,
                result
            );
        }
    }

    #[tokio::test]
    async fn forged_token_rejected() {
        let (issuer, _) = issuer();
        let other = TokenIssuer::new("another-secret", Arc::new(MemoryCache::new()));
        let forged = other.issue(&identity("a@example.com")).await.unwrap();

        let result = issuer.validate(Some(&bearer(&forged))).await;
        assert!(matches!(result, Err(AuthError::InvalidSignature(_))));

        let result = issuer.validate(Some("Bearer not.a.jwt")).await;
        assert!(matches!(result, Err(AuthError::InvalidSignature(_))));
    }

    #[tokio::test]
    async fn revoke_kills_token() {
        let (issuer, _) = issuer();
        let alice = identity("a@example.com");
        let token = issuer.issue(&alice).await.unwrap();

        issuer.revoke(&alice.email).await.unwrap();
        let result = issuer.validate(Some(&bearer(&token))).await;
        assert!(matches!(result, Err(AuthError::Unauthenticated)));
    }

    #[tokio::test]
    async fn cache_miss_is_unauthenticated() {
        let (issuer, cache) = issuer();
        let token = issuer.issue(&identity("a@example.com")).await.unwrap();
        cache.delete("a@example.com").await.unwrap();

        let result = issuer.validate(Some(&bearer(&token))).await;
        assert!(matches!(result, Err(AuthError::Unauthenticated)));
    }

    #[tokio::test]
    async fn reissue_supersedes_previous_token() {
        let (issuer, _) = issuer();
        let alice = identity("a@example.com");
        let first = issuer.issue(&alice).await.unwrap();
        // exp has one-second resolution; wait so the second token differs.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let second = issuer.issue(&alice).await.unwrap();
        assert_ne!(first, second);

        assert!(issuer.validate(Some(&bearer(&first))).await.is_err());
        assert!(issuer.validate(Some(&bearer(&second))).await.is_ok());
    }
}

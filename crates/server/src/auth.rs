//! Access-token verification for WebSocket and REST callers.
//!
//! Issuance belongs to the login service; this side only checks HS256 access tokens and the
//! revocation list before a caller reaches the hub.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Authenticated caller, trusted by everything downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: u64,
    pub username: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing access token")]
    MissingToken,
    #[error("access token is invalid or expired")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),
    #[error("refresh tokens cannot be used here")]
    RefreshToken,
    #[error("access token has been revoked")]
    Revoked,
    #[error("token check failed: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub user_id: u64,
    pub username: String,
    #[serde(default)]
    pub is_refresh: bool,
    pub iat: usize,
    pub exp: usize,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    async fn is_blacklisted(&self, token: &str) -> Result<bool, String>;
}

/// Revoked tokens held in memory.
#[derive(Default)]
pub struct MemoryBlacklist {
    tokens: RwLock<HashSet<String>>,
}

impl MemoryBlacklist {
    pub async fn revoke(&self, token: impl Into<String>) {
        self.tokens.write().await.insert(token.into());
    }
}

#[async_trait]
impl TokenBlacklist for MemoryBlacklist {
    async fn is_blacklisted(&self, token: &str) -> Result<bool, String> {
        Ok(self.tokens.read().await.contains(token))
    }
}

pub struct JwtVerifier {
    decoding: DecodingKey,
    validation: Validation,
    blacklist: Arc<dyn TokenBlacklist>,
}

impl JwtVerifier {
    pub fn new(secret: &[u8], blacklist: Arc<dyn TokenBlacklist>) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            blacklist,
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = jsonwebtoken::decode::<AccessTokenClaims>(token, &self.decoding, &self.validation)
            .map_err(AuthError::InvalidToken)?;
        if data.claims.is_refresh {
            return Err(AuthError::RefreshToken);
        }
        if self
            .blacklist
            .is_blacklisted(token)
            .await
            .map_err(AuthError::Backend)?
        {
            return Err(AuthError::Revoked);
        }
        Ok(Identity {
            user_id: data.claims.user_id,
            username: data.claims.username,
        })
    }
}

/// Sign an access token. Used by dev tooling and tests; production tokens come from the
/// login service sharing the same secret.
pub fn issue_access_token(
    secret: &[u8],
    user_id: u64,
    username: &str,
    ttl: chrono::Duration,
) -> anyhow::Result<String> {
    let now = chrono::Utc::now();
    let claims = AccessTokenClaims {
        user_id,
        username: username.to_string(),
        is_refresh: false,
        iat: now.timestamp() as usize,
        exp: (now + ttl).timestamp() as usize,
    };
    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

/// Random hex secret for when none is configured. Tokens signed with it die with the process.
pub fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    fn verifier() -> (JwtVerifier, Arc<MemoryBlacklist>) {
        let blacklist = Arc::new(MemoryBlacklist::default());
        (JwtVerifier::new(SECRET, blacklist.clone()), blacklist)
    }

    #[tokio::test]
    async fn valid_token_yields_identity() {
        let (verifier, _) = verifier();
        let token = issue_access_token(SECRET, 9, "carol", chrono::Duration::minutes(5)).unwrap();
        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(
            identity,
            Identity {
                user_id: 9,
                username: "carol".to_string()
            }
        );
    }

    #[tokio::test]
    async fn wrong_secret_and_expired_tokens_are_rejected() {
        let (verifier, _) = verifier();
        let forged = issue_access_token(b"other", 9, "carol", chrono::Duration::minutes(5)).unwrap();
        assert!(matches!(
            verifier.verify(&forged).await,
            Err(AuthError::InvalidToken(_))
        ));

        let expired = issue_access_token(SECRET, 9, "carol", chrono::Duration::hours(-1)).unwrap();
        assert!(matches!(
            verifier.verify(&expired).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn refresh_and_revoked_tokens_are_rejected() {
        let (verifier, blacklist) = verifier();
        let now = chrono::Utc::now().timestamp() as usize;
        let refresh = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &AccessTokenClaims {
                user_id: 9,
                username: "carol".to_string(),
                is_refresh: true,
                iat: now,
                exp: now + 300,
            },
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert!(matches!(
            verifier.verify(&refresh).await,
            Err(AuthError::RefreshToken)
        ));

        let token = issue_access_token(SECRET, 9, "carol", chrono::Duration::minutes(5)).unwrap();
        blacklist.revoke(token.clone()).await;
        assert!(matches!(verifier.verify(&token).await, Err(AuthError::Revoked)));
    }

    #[test]
    fn bearer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def"));

        headers.insert(AUTHORIZATION, "bearer   xyz".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("xyz"));

        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}

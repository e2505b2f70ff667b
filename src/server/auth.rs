//! Request Authentication
//!
//! Account endpoints take the auth provider's access token as
//! `Authorization: Bearer <jwt>` (HS256, `sub` = account id). The bot
//! endpoint takes a shared secret the same way.

use axum::{extract::FromRequestParts, http::header, http::request::Parts};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::error::ApiError;
use super::AppState;

/// JWT claims issued by the auth provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (account ID)
    pub sub: String,
    /// Expiration
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
}

/// Verification keys
pub struct AuthKeys {
    decoding_key: Option<DecodingKey>,
    bot_secret_hash: Option<[u8; 32]>,
}

impl AuthKeys {
    pub fn new(jwt_secret: Option<&str>, bot_secret: Option<&str>) -> Self {
        Self {
            decoding_key: jwt_secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
            bot_secret_hash: bot_secret.map(|s| Sha256::digest(s.as_bytes()).into()),
        }
    }

    /// Validate an access token and return its claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, ApiError> {
        let key = self
            .decoding_key
            .as_ref()
            .ok_or(ApiError::Unauthorized("Authentication is not configured"))?;

        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                ApiError::Unauthorized("Token expired")
            }
            _ => ApiError::Unauthorized("Invalid token"),
        })?;

        if data.claims.sub.trim().is_empty() {
            return Err(ApiError::Unauthorized("Invalid token"));
        }
        Ok(data.claims)
    }

    /// Compare against the bot secret by digest
    pub fn verify_bot_secret(&self, candidate: &str) -> bool {
        match &self.bot_secret_hash {
            Some(expected) => {
                let got: [u8; 32] = Sha256::digest(candidate.as_bytes()).into();
                got == *expected
            }
            None => false,
        }
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthorized("Missing bearer token"))
}

/// The signed-in account making the request
#[derive(Debug, Clone)]
pub struct AuthAccount(pub String);

impl FromRequestParts<Arc<AppState>> for AuthAccount {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let claims = state.auth.validate_token(token)?;
        Ok(Self(claims.sub))
    }
}

/// A request from a channel adapter holding the bot secret
#[derive(Debug, Clone, Copy)]
pub struct BotCaller;

impl FromRequestParts<Arc<AppState>> for BotCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        if state.auth.verify_bot_secret(token) {
            Ok(Self)
        } else {
            Err(ApiError::Unauthorized("Invalid bot credentials"))
        }
    }
}

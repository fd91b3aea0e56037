//! Bearer-token authentication: JWT access/refresh pairs signed HS256,
//! bcrypt password verification, and a logout denylist that blocks a
//! token's id until its natural expiry.

use crate::domain::repositories::UserRepository;
use crate::domain::types::UserId;
use crate::interfaces::api::AppContext;
use crate::interfaces::api::error::ApiError;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::{Json, http::StatusCode};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("token has been revoked")]
    TokenRevoked,
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::unauthorized(err.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    jti: String,
    iat: i64,
    exp: i64,
    typ: String,
}

#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

/// Issues, refreshes and revokes JWT pairs. The denylist is in-memory and
/// pruned on each touch; entries outlive their token's own expiry by nothing.
#[derive(Clone)]
pub struct AuthService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
    denylist: Arc<RwLock<HashMap<String, i64>>>,
}

impl AuthService {
    pub fn new(secret: &str, access_ttl_secs: u64, refresh_ttl_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl_secs,
            refresh_ttl_secs,
            denylist: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn issue(&self, user_id: UserId, typ: &str, ttl_secs: u64) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl_secs as i64,
            typ: typ.to_string(),
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(|_| AuthError::InvalidToken)
    }

    pub fn issue_pair(&self, user_id: UserId) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access_token: self.issue(user_id, "access", self.access_ttl_secs)?,
            refresh_token: self.issue(user_id, "refresh", self.refresh_ttl_secs)?,
            expires_in: self.access_ttl_secs,
        })
    }

    async fn decode_checked(&self, token: &str, expected_typ: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|_| AuthError::InvalidToken)?;
        if data.claims.typ != expected_typ {
            return Err(AuthError::InvalidToken);
        }
        let now = Utc::now().timestamp();
        let mut denylist = self.denylist.write().await;
        denylist.retain(|_, exp| *exp > now);
        if denylist.contains_key(&data.claims.jti) {
            return Err(AuthError::TokenRevoked);
        }
        Ok(data.claims)
    }

    pub async fn verify_access(&self, token: &str) -> Result<UserId, AuthError> {
        let claims = self.decode_checked(token, "access").await?;
        claims.sub.parse().map_err(|_| AuthError::InvalidToken)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.decode_checked(refresh_token, "refresh").await?;
        let user_id: UserId = claims.sub.parse().map_err(|_| AuthError::InvalidToken)?;
        // The used refresh token is burned; a stolen copy is dead after the
        // legitimate client rotates.
        self.denylist.write().await.insert(claims.jti, claims.exp);
        self.issue_pair(user_id)
    }

    /// Blacklists the token's id until its expiry.
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|_| AuthError::InvalidToken)?;
        self.denylist
            .write()
            .await
            .insert(data.claims.jti, data.claims.exp);
        Ok(())
    }

    pub async fn login(
        &self,
        users: &dyn UserRepository,
        email: &str,
        password: &str,
    ) -> Result<TokenPair, AuthError> {
        let user = users
            .by_email(email)
            .await
            .map_err(|_| AuthError::InvalidCredentials)?
            .ok_or(AuthError::InvalidCredentials)?;
        let verified = bcrypt::verify(password, &user.password_hash).unwrap_or(false);
        if !verified {
            warn!("Auth: Failed login for {}", email);
            return Err(AuthError::InvalidCredentials);
        }
        info!("Auth: {} logged in", email);
        self.issue_pair(user.id)
    }
}

/// Extractor yielding the authenticated `UserId` from the bearer token.
pub struct AuthUser(pub UserId);

#[async_trait::async_trait]
impl FromRequestParts<Arc<AppContext>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &Arc<AppContext>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| {
            ApiError::unauthorized("missing or malformed Authorization header")
        })?;
        let user_id = ctx.auth.verify_access(&token).await?;
        Ok(AuthUser(user_id))
    }
}

pub(crate) fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

/// Client key for rate limiting: proxy-reported address when present.
pub(crate) fn client_key(parts: &Parts) -> String {
    parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// ---- Handlers ----

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn login(
    State(ctx): State<Arc<AppContext>>,
    parts: Parts,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    if !ctx.login_limiter.check(&client_key(&parts)).await {
        return Err(ApiError::rate_limited());
    }
    let pair = ctx.auth.login(ctx.users.as_ref(), &req.email, &req.password).await?;
    Ok(Json(pair))
}

pub async fn refresh(
    State(ctx): State<Arc<AppContext>>,
    parts: Parts,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    if !ctx.refresh_limiter.check(&client_key(&parts)).await {
        return Err(ApiError::rate_limited());
    }
    let pair = ctx.auth.refresh(&req.refresh_token).await?;
    Ok(Json(pair))
}

pub async fn logout(
    State(ctx): State<Arc<AppContext>>,
    parts: Parts,
) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&parts)
        .ok_or_else(|| ApiError::unauthorized("missing or malformed Authorization header"))?;
    ctx.auth.revoke(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}

// src/utils/jwt.rs

use std::fmt;

use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{error::AppError, state::AppState, utils::sessions::Principal};

/// Which table a principal lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    /// Administrators and staff (`users` table).
    Internal,
    /// Test-takers (`takers` table).
    Taker,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Internal => "internal",
            UserType::Taker => "taker",
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT Claims structure.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Claims {
    /// Subject - Stores the principal ID (as string).
    pub sub: String,
    pub user_type: UserType,
    /// Session id; must match the principal's `active_session_id`.
    pub sid: Uuid,
    /// Tenant the token was issued for, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<i64>,
    /// Expiration time as Unix timestamp.
    pub exp: usize,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, AppError> {
        self.sub
            .parse::<i64>()
            .map_err(|_| AppError::AuthError("Invalid token subject".to_string()))
    }

    pub fn principal(&self) -> Result<Principal, AppError> {
        Ok(Principal {
            user_type: self.user_type,
            id: self.user_id()?,
        })
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp as i64, 0)
    }
}

/// Signs a new session token.
///
/// Returns the token together with its expiry instant.
pub fn sign_jwt(
    id: i64,
    user_type: UserType,
    session_id: Uuid,
    client_id: Option<i64>,
    secret: &str,
    expiration_seconds: u64,
) -> Result<(String, DateTime<Utc>), AppError> {
    let expires_at = Utc::now() + chrono::Duration::seconds(expiration_seconds as i64);

    let claims = Claims {
        sub: id.to_string(),
        user_type,
        sid: session_id,
        client_id,
        exp: expires_at.timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))?;

    Ok((token, expires_at))
}

/// Verifies and decodes a JWT string.
///
/// Returns the `Claims` if valid, otherwise returns an `AppError`.
pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::AuthError("Invalid token".to_string()))?;

    Ok(token_data.claims)
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(value: &str) -> Option<&str> {
    value.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

/// Loads the principal's current session id.
///
/// `None` when the principal is gone, soft-deleted, or logged out.
pub async fn active_session(pool: &PgPool, principal: Principal) -> Result<Option<Uuid>, AppError> {
    let sql = match principal.user_type {
        UserType::Internal => {
            "SELECT active_session_id FROM users WHERE id = $1 AND deleted_at IS NULL"
        }
        UserType::Taker => {
            "SELECT active_session_id FROM takers WHERE id = $1 AND deleted_at IS NULL"
        }
    };

    let row: Option<(Option<Uuid>,)> = sqlx::query_as(sql)
        .bind(principal.id)
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load active session: {:?}", e);
            AppError::from(e)
        })?;

    Ok(row.and_then(|(sid,)| sid))
}

/// Verifies a token and checks it is still the principal's live session.
pub async fn authenticate(pool: &PgPool, secret: &str, token: &str) -> Result<Claims, AppError> {
    let claims = verify_jwt(token, secret)?;
    let principal = claims.principal()?;

    match active_session(pool, principal).await? {
        Some(sid) if sid == claims.sid => Ok(claims),
        _ => Err(AppError::AuthError("Session expired".to_string())),
    }
}

/// Axum Middleware: Authentication.
///
/// Validates the 'Authorization: Bearer <token>' header and the session it names.
/// If valid, injects `Claims` into the request extensions for handlers to use.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(|| AppError::AuthError("Authentication required".to_string()))?;

    let claims = authenticate(&state.pool, &state.config.jwt_secret, token).await?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Axum Middleware: internal users only.
///
/// Must be used AFTER `auth_middleware`.
pub async fn internal_middleware(req: Request<Body>, next: Next) -> Result<Response, AppError> {
    require_user_type(&req, UserType::Internal)?;
    Ok(next.run(req).await)
}

/// Axum Middleware: takers only.
///
/// Must be used AFTER `auth_middleware`.
pub async fn taker_middleware(req: Request<Body>, next: Next) -> Result<Response, AppError> {
    require_user_type(&req, UserType::Taker)?;
    Ok(next.run(req).await)
}

fn require_user_type(req: &Request<Body>, expected: UserType) -> Result<(), AppError> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or_else(|| AppError::AuthError("Authentication required".to_string()))?;

    if claims.user_type != expected {
        return Err(AppError::Forbidden("Insufficient permissions".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit_test_secret";

    #[test]
    fn sign_then_verify_keeps_claims() {
        let sid = Uuid::new_v4();
        let (token, expires_at) = sign_jwt(9, UserType::Taker, sid, Some(4), SECRET, 600).unwrap();

        let claims = verify_jwt(&token, SECRET).unwrap();
        assert_eq!(claims.user_id().unwrap(), 9);
        assert_eq!(claims.user_type, UserType::Taker);
        assert_eq!(claims.sid, sid);
        assert_eq!(claims.client_id, Some(4));
        assert_eq!(claims.expires_at().unwrap().timestamp(), expires_at.timestamp());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let (token, _) = sign_jwt(1, UserType::Internal, Uuid::new_v4(), None, SECRET, 600).unwrap();
        assert!(matches!(
            verify_jwt(&token, "other"),
            Err(AppError::AuthError(_))
        ));
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic abc"), None);
    }

    #[test]
    fn user_type_serializes_lowercase() {
        assert_eq!(serde_json::to_value(UserType::Internal).unwrap(), "internal");
        let parsed: UserType = serde_json::from_str("\"taker\"").unwrap();
        assert_eq!(parsed, UserType::Taker);
    }
}

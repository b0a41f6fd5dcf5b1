// src/handlers/auth.rs

use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, header},
    response::IntoResponse,
};
use serde_json::{Value, json};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::user::{LoginRequest, Profile, TAKER_COLUMNS, Taker, USER_COLUMNS, User},
    state::AppState,
    utils::{
        hash::verify_password,
        jwt::{Claims, UserType, bearer_token, sign_jwt},
        sessions::Principal,
        tenant::ClientContext,
    },
};

const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// Authenticates an internal user or a taker and opens a new session.
///
/// Any previous session of the same principal stops working, and a socket
/// still connected for it receives `force_logout`.
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let user_type = payload.user_type.unwrap_or(UserType::Taker);

    let profile = match user_type {
        UserType::Internal => {
            let user = find_user(&state.pool, &payload.username, None).await?;
            check_password(&payload.password, user.as_ref().map(|u| u.password.as_str()))?;
            user.as_ref().map(Profile::from)
        }
        UserType::Taker => {
            let taker = find_taker(&state.pool, &payload.username).await?;
            check_password(&payload.password, taker.as_ref().map(|t| t.password.as_str()))?;
            taker.as_ref().map(Profile::from)
        }
    }
    .ok_or_else(|| AppError::AuthError(INVALID_CREDENTIALS.to_string()))?;

    let client_id = profile.client_id;
    open_session(&state, profile, client_id).await
}

/// Internal login scoped to the tenant resolved from the request.
pub async fn login_client(
    State(state): State<AppState>,
    client: ClientContext,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let user = find_user(&state.pool, &payload.username, Some(client.client_id)).await?;
    check_password(&payload.password, user.as_ref().map(|u| u.password.as_str()))?;

    let user = user.ok_or_else(|| AppError::AuthError(INVALID_CREDENTIALS.to_string()))?;

    tracing::info!(
        "User {} logged in for client {}",
        user.username,
        client.client_slug
    );

    open_session(&state, Profile::from(&user), Some(client.client_id)).await
}

/// Ends the caller's session.
///
/// The stored session is only cleared when it is still the one in the token.
pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let id = claims.user_id()?;

    let sql = match claims.user_type {
        UserType::Internal => {
            "UPDATE users SET active_session_id = NULL, updated_at = NOW() \
             WHERE id = $1 AND active_session_id = $2"
        }
        UserType::Taker => {
            "UPDATE takers SET active_session_id = NULL, updated_at = NOW() \
             WHERE id = $1 AND active_session_id = $2"
        }
    };

    sqlx::query(sql)
        .bind(id)
        .bind(claims.sid)
        .execute(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to clear session: {:?}", e);
            AppError::from(e)
        })?;

    state.sessions.disconnect_session(claims.sid).await;

    Ok(Json(json!({ "message": "Logged out" })))
}

/// Returns the profile of the logged-in principal.
pub async fn me(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let profile = load_profile(&pool, claims.principal()?).await?;
    Ok(Json(profile))
}

/// Returns the profile together with the current token and its expiry.
pub async fn session(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let profile = load_profile(&pool, claims.principal()?).await?;

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token);

    Ok(Json(json!({
        "user": profile,
        "session": {
            "token": token,
            "expires_at": claims.expires_at(),
            "user_type": claims.user_type,
            "client_id": claims.client_id,
        }
    })))
}

/// Rotates the principal's session id, kicks any live socket and signs a token.
async fn open_session(
    state: &AppState,
    profile: Profile,
    client_id: Option<i64>,
) -> Result<Json<Value>, AppError> {
    let session_id = Uuid::new_v4();
    let principal = Principal {
        user_type: profile.user_type,
        id: profile.id,
    };

    let sql = match principal.user_type {
        UserType::Internal => {
            "UPDATE users SET active_session_id = $1, last_login = NOW(), updated_at = NOW() \
             WHERE id = $2"
        }
        UserType::Taker => {
            "UPDATE takers SET active_session_id = $1, updated_at = NOW() WHERE id = $2"
        }
    };

    sqlx::query(sql)
        .bind(session_id)
        .bind(principal.id)
        .execute(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to store session: {:?}", e);
            AppError::from(e)
        })?;

    if state.sessions.force_disconnect(principal).await {
        tracing::info!(
            "Closed previous session socket for {} {}",
            principal.user_type,
            principal.id
        );
    }

    let (token, expires_at) = sign_jwt(
        principal.id,
        principal.user_type,
        session_id,
        client_id,
        &state.config.jwt_secret,
        state.config.jwt_expiration,
    )?;

    Ok(Json(json!({
        "token": token,
        "type": "Bearer",
        "expires_at": expires_at,
        "user_type": principal.user_type,
        "user": profile,
    })))
}

/// Unknown logins and wrong passwords fail with the same message.
fn check_password(password: &str, stored: Option<&str>) -> Result<(), AppError> {
    let valid = match stored {
        Some(hash) => verify_password(password, hash)?,
        None => false,
    };

    if !valid {
        return Err(AppError::AuthError(INVALID_CREDENTIALS.to_string()));
    }
    Ok(())
}

async fn find_user(
    pool: &PgPool,
    login: &str,
    client_id: Option<i64>,
) -> Result<Option<User>, AppError> {
    let mut sql = format!(
        "SELECT {USER_COLUMNS} FROM users \
         WHERE (username = $1 OR email = $1) AND deleted_at IS NULL"
    );
    if client_id.is_some() {
        sql.push_str(" AND client_id = $2");
    }

    let mut query = sqlx::query_as::<_, User>(&sql).bind(login);
    if let Some(client_id) = client_id {
        query = query.bind(client_id);
    }

    query.fetch_optional(pool).await.map_err(|e| {
        tracing::error!("Login DB error: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })
}

async fn find_taker(pool: &PgPool, login: &str) -> Result<Option<Taker>, AppError> {
    sqlx::query_as::<_, Taker>(&format!(
        "SELECT {TAKER_COLUMNS} FROM takers \
         WHERE (reg = $1 OR username = $1 OR email = $1) \
           AND status = 'active' AND deleted_at IS NULL \
         ORDER BY id LIMIT 1"
    ))
    .bind(login)
    .fetch_optional(pool)
    .await
    .map_err(|e| {
        tracing::error!("Login DB error: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })
}

async fn load_profile(pool: &PgPool, principal: Principal) -> Result<Profile, AppError> {
    let profile = match principal.user_type {
        UserType::Internal => sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(principal.id)
        .fetch_optional(pool)
        .await?
        .as_ref()
        .map(Profile::from),
        UserType::Taker => sqlx::query_as::<_, Taker>(&format!(
            "SELECT {TAKER_COLUMNS} FROM takers WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(principal.id)
        .fetch_optional(pool)
        .await?
        .as_ref()
        .map(Profile::from),
    };

    profile.ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

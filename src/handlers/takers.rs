// src/handlers/takers.rs

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::{PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    error::{AppError, conflict_or_internal},
    models::user::{CreateTakerRequest, TAKER_COLUMNS, Taker, UpdateTakerRequest},
    utils::{
        codes::next_registration_number,
        hash::hash_password,
        pagination::{Paginated, PaginationParams},
    },
};

const DUPLICATE_TAKER: &str = "A taker with this registration number or username already exists";

/// Lists takers, newest first.
pub async fn list_takers(
    State(pool): State<PgPool>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, AppError> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM takers WHERE deleted_at IS NULL")
        .fetch_one(&pool)
        .await?;

    let takers = sqlx::query_as::<_, Taker>(&format!(
        "SELECT {TAKER_COLUMNS} FROM takers WHERE deleted_at IS NULL \
         ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
    ))
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list takers: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(Paginated {
        items: takers,
        pagination: params.meta(total),
    }))
}

pub async fn get_taker(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(fetch_taker(&pool, id).await?))
}

/// Creates a taker.
///
/// The registration number defaults to `T<year><sequence>` and the
/// password defaults to the registration number.
pub async fn create_taker(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateTakerRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let reg = match payload.reg {
        Some(reg) => reg.trim().to_string(),
        None => {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM takers")
                .fetch_one(&pool)
                .await?;
            next_registration_number(count)
        }
    };

    let hashed_password = hash_password(payload.password.as_deref().unwrap_or(&reg))?;

    let taker = sqlx::query_as::<_, Taker>(&format!(
        "INSERT INTO takers (client_id, reg, name, username, email, phone, address, status, password) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {TAKER_COLUMNS}"
    ))
    .bind(payload.client_id)
    .bind(&reg)
    .bind(payload.name.trim())
    .bind(&payload.username)
    .bind(&payload.email)
    .bind(&payload.phone)
    .bind(&payload.address)
    .bind(payload.status.as_deref().unwrap_or("active"))
    .bind(hashed_password)
    .fetch_one(&pool)
    .await
    .map_err(|e| conflict_or_internal(e, DUPLICATE_TAKER))?;

    tracing::info!("Taker {} created", taker.reg);

    Ok((StatusCode::CREATED, Json(taker)))
}

/// Updates a taker. A supplied password is re-hashed.
pub async fn update_taker(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateTakerRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("UPDATE takers SET updated_at = NOW()");

    if let Some(reg) = payload.reg {
        builder.push(", reg = ").push_bind(reg.trim().to_string());
    }
    if let Some(name) = payload.name {
        builder.push(", name = ").push_bind(name.trim().to_string());
    }
    if let Some(username) = payload.username {
        builder.push(", username = ").push_bind(username);
    }
    if let Some(email) = payload.email {
        builder.push(", email = ").push_bind(email);
    }
    if let Some(phone) = payload.phone {
        builder.push(", phone = ").push_bind(phone);
    }
    if let Some(address) = payload.address {
        builder.push(", address = ").push_bind(address);
    }
    if let Some(status) = payload.status {
        builder.push(", status = ").push_bind(status);
    }
    if let Some(password) = payload.password {
        builder.push(", password = ").push_bind(hash_password(&password)?);
    }
    builder
        .push(" WHERE deleted_at IS NULL AND id = ")
        .push_bind(id);

    let result = builder
        .build()
        .execute(&pool)
        .await
        .map_err(|e| conflict_or_internal(e, DUPLICATE_TAKER))?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Taker not found".to_string()));
    }

    Ok(Json(fetch_taker(&pool, id).await?))
}

/// Soft-deletes a taker and ends their session.
pub async fn delete_taker(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query(
        "UPDATE takers SET deleted_at = NOW(), active_session_id = NULL \
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to delete taker: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Taker not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_taker(pool: &PgPool, id: i64) -> Result<Taker, AppError> {
    sqlx::query_as::<_, Taker>(&format!(
        "SELECT {TAKER_COLUMNS} FROM takers WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Taker not found".to_string()))
}

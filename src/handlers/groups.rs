// src/handlers/groups.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    error::{AppError, conflict_or_internal},
    models::{
        delivery::{
            CreateGroupRequest, GROUP_COLUMNS, Group, GroupSummary, GroupTakersRequest,
            UpdateGroupRequest,
        },
        user::{TAKER_COLUMNS, Taker},
    },
    utils::codes::group_code,
};

const DUPLICATE_GROUP: &str = "A group with this code already exists";

const SUMMARY_SELECT: &str = r#"
    SELECT g.id, g.code, g.name, g.last_taker_code, g.created_at, g.updated_at,
           (SELECT COUNT(*) FROM group_takers gt WHERE gt.group_id = g.id) AS taker_count,
           (SELECT COUNT(*) FROM deliveries d WHERE d.group_id = g.id) AS delivery_count
    FROM groups g
"#;

/// Lists groups by name with their taker and delivery counts.
pub async fn list_groups(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let groups = sqlx::query_as::<_, GroupSummary>(&format!("{SUMMARY_SELECT} ORDER BY g.name"))
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list groups: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    Ok(Json(groups))
}

pub async fn get_group(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let group = sqlx::query_as::<_, GroupSummary>(&format!("{SUMMARY_SELECT} WHERE g.id = $1"))
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Group not found".to_string()))?;

    Ok(Json(group))
}

/// Creates a group. Without a code a random six-letter one is generated.
pub async fn create_group(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let code = payload
        .code
        .map(|c| c.trim().to_uppercase())
        .unwrap_or_else(group_code);

    let group = sqlx::query_as::<_, Group>(&format!(
        "INSERT INTO groups (code, name) VALUES ($1, $2) RETURNING {GROUP_COLUMNS}"
    ))
    .bind(&code)
    .bind(payload.name.trim())
    .fetch_one(&pool)
    .await
    .map_err(|e| conflict_or_internal(e, DUPLICATE_GROUP))?;

    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn update_group(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("UPDATE groups SET updated_at = NOW()");
    if let Some(code) = payload.code {
        builder.push(", code = ").push_bind(code.trim().to_uppercase());
    }
    if let Some(name) = payload.name {
        builder.push(", name = ").push_bind(name.trim().to_string());
    }
    builder.push(" WHERE id = ").push_bind(id);
    builder.push(format!(" RETURNING {GROUP_COLUMNS}"));

    let group = builder
        .build_query_as::<Group>()
        .fetch_optional(&pool)
        .await
        .map_err(|e| conflict_or_internal(e, DUPLICATE_GROUP))?
        .ok_or_else(|| AppError::NotFound("Group not found".to_string()))?;

    Ok(Json(group))
}

/// Deletes a group. Its deliveries are kept without a group.
pub async fn delete_group(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM groups WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete group: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Group not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Lists the group's members by name.
pub async fn list_group_takers(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    ensure_group(&pool, id).await?;

    let columns = TAKER_COLUMNS
        .split(", ")
        .map(|c| format!("t.{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    let takers = sqlx::query_as::<_, Taker>(&format!(
        "SELECT {columns} FROM group_takers gt \
         JOIN takers t ON t.id = gt.taker_id \
         WHERE gt.group_id = $1 AND t.deleted_at IS NULL \
         ORDER BY t.name"
    ))
    .bind(id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(takers))
}

/// Adds takers to the group. Unknown takers and existing members are skipped.
pub async fn add_group_takers(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<GroupTakersRequest>,
) -> Result<impl IntoResponse, AppError> {
    ensure_group(&pool, id).await?;

    if payload.taker_ids.is_empty() {
        return Err(AppError::BadRequest("taker_ids must not be empty".to_string()));
    }

    let added = sqlx::query(
        "INSERT INTO group_takers (group_id, taker_id) \
         SELECT $1, id FROM takers WHERE id = ANY($2) AND deleted_at IS NULL \
         ON CONFLICT DO NOTHING",
    )
    .bind(id)
    .bind(&payload.taker_ids)
    .execute(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to add group takers: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?
    .rows_affected();

    Ok(Json(json!({ "added": added })))
}

pub async fn remove_group_taker(
    State(pool): State<PgPool>,
    Path((id, taker_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM group_takers WHERE group_id = $1 AND taker_id = $2")
        .bind(id)
        .bind(taker_id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Taker is not in this group".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn ensure_group(pool: &PgPool, id: i64) -> Result<(), AppError> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM groups WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound("Group not found".to_string()))
}

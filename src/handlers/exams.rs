// src/handlers/exams.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder, types::Json as SqlJson};
use validator::Validate;

use crate::{
    error::{AppError, conflict_or_internal},
    handlers::items::{fetch_item, load_items},
    models::{
        exam::{
            CreateExamRequest, EXAM_COLUMNS, Exam, ExamSummary, LinkItemRequest,
            UpdateExamRequest,
        },
        question::{Item, ItemWithQuestions},
    },
    utils::{
        jwt::Claims,
        pagination::{Paginated, PaginationParams},
        tenant::ClientContext,
    },
};

const DUPLICATE_EXAM_CODE: &str = "An exam with this code already exists";

const SUMMARY_SELECT: &str = r#"
    SELECT e.id, e.client_id, e.code, e.name, e.description, e.options, e.is_mcq,
           e.is_interview, e.is_random, e.created_at, e.updated_at,
           (SELECT COUNT(*) FROM deliveries d WHERE d.exam_id = e.id) AS delivery_count,
           (SELECT COUNT(*) FROM attempts a WHERE a.exam_id = e.id) AS attempt_count
    FROM exams e
"#;

pub(crate) async fn fetch_exam(pool: &PgPool, id: i64) -> Result<Exam, AppError> {
    sqlx::query_as::<_, Exam>(&format!("SELECT {EXAM_COLUMNS} FROM exams WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))
}

/// Items linked to an exam in position order, with questions and answers.
pub(crate) async fn load_exam_items(
    pool: &PgPool,
    exam_id: i64,
) -> Result<Vec<ItemWithQuestions>, AppError> {
    let items = sqlx::query_as::<_, Item>(
        r#"
        SELECT i.id, i.title, i.content, i.type, i.is_vignette, i.is_random, i.score,
               i.created_at, i.updated_at
        FROM exam_items ei
        JOIN items i ON i.id = ei.item_id
        WHERE ei.exam_id = $1
        ORDER BY ei.position, i.id
        "#,
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await?;

    load_items(pool, items).await
}

/// Lists all exams, newest first, with delivery and attempt counts.
pub async fn list_exams(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let exams = sqlx::query_as::<_, ExamSummary>(&format!(
        "{SUMMARY_SELECT} ORDER BY e.created_at DESC, e.id DESC"
    ))
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list exams: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(exams))
}

pub async fn get_exam(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let exam = sqlx::query_as::<_, ExamSummary>(&format!("{SUMMARY_SELECT} WHERE e.id = $1"))
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))?;

    Ok(Json(exam))
}

pub async fn create_exam(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let client_id = payload.client_id;
    let exam = insert_exam(&pool, payload, client_id).await?;

    tracing::info!("Exam '{}' created", exam.code);

    Ok((StatusCode::CREATED, Json(exam)))
}

/// Updates an exam. Absent fields are left unchanged; `options` replaces the whole object.
pub async fn update_exam(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("UPDATE exams SET updated_at = NOW()");

    if let Some(code) = payload.code {
        builder.push(", code = ").push_bind(code);
    }
    if let Some(name) = payload.name {
        builder.push(", name = ").push_bind(name);
    }
    if let Some(description) = payload.description {
        builder.push(", description = ").push_bind(description);
    }
    if let Some(options) = payload.options {
        builder.push(", options = ").push_bind(SqlJson(options));
    }
    if let Some(is_mcq) = payload.is_mcq {
        builder.push(", is_mcq = ").push_bind(is_mcq);
    }
    if let Some(is_interview) = payload.is_interview {
        builder.push(", is_interview = ").push_bind(is_interview);
    }
    if let Some(is_random) = payload.is_random {
        builder.push(", is_random = ").push_bind(is_random);
    }
    builder.push(" WHERE id = ").push_bind(id);

    let result = builder
        .build()
        .execute(&pool)
        .await
        .map_err(|e| conflict_or_internal(e, DUPLICATE_EXAM_CODE))?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Exam not found".to_string()));
    }

    Ok(Json(fetch_exam(&pool, id).await?))
}

/// Deletes an exam with its deliveries and attempts.
pub async fn delete_exam(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM exams WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete exam: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Exam not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Returns the exam's items in position order, correct flags included.
pub async fn list_exam_items(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    fetch_exam(&pool, id).await?;
    Ok(Json(load_exam_items(&pool, id).await?))
}

/// Links an item to an exam, or moves it when already linked.
///
/// Without a position the item goes after the current last one.
pub async fn link_exam_item(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<LinkItemRequest>,
) -> Result<impl IntoResponse, AppError> {
    fetch_exam(&pool, id).await?;
    fetch_item(&pool, payload.item_id).await?;

    let position: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO exam_items (exam_id, item_id, position)
        VALUES ($1, $2, COALESCE($3, (SELECT COALESCE(MAX(position), 0) + 1 FROM exam_items WHERE exam_id = $1)))
        ON CONFLICT (exam_id, item_id) DO UPDATE SET position = EXCLUDED.position
        RETURNING position
        "#,
    )
    .bind(id)
    .bind(payload.item_id)
    .bind(payload.position)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to link item to exam: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "exam_id": id, "item_id": payload.item_id, "position": position })),
    ))
}

pub async fn unlink_exam_item(
    State(pool): State<PgPool>,
    Path((id, item_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM exam_items WHERE exam_id = $1 AND item_id = $2")
        .bind(id)
        .bind(item_id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Item is not part of this exam".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Lists the resolved client's exams, newest first.
pub async fn list_client_exams(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    client: ClientContext,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, AppError> {
    client.authorize(&claims)?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM exams WHERE client_id = $1")
        .bind(client.client_id)
        .fetch_one(&pool)
        .await?;

    let exams = sqlx::query_as::<_, Exam>(&format!(
        "SELECT {EXAM_COLUMNS} FROM exams WHERE client_id = $1 \
         ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
    ))
    .bind(client.client_id)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list client exams: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(Paginated {
        items: exams,
        pagination: params.meta(total),
    }))
}

/// Creates an exam owned by the resolved client. Codes are unique per client.
pub async fn create_client_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    client: ClientContext,
    Json(payload): Json<CreateExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    client.authorize(&claims)?;
    payload.validate()?;

    let exam = insert_exam(&pool, payload, Some(client.client_id)).await?;

    tracing::info!(
        "Exam '{}' created for client {}",
        exam.code,
        client.client_slug
    );

    Ok((StatusCode::CREATED, Json(exam)))
}

async fn insert_exam(
    pool: &PgPool,
    payload: CreateExamRequest,
    client_id: Option<i64>,
) -> Result<Exam, AppError> {
    sqlx::query_as::<_, Exam>(&format!(
        "INSERT INTO exams (client_id, code, name, description, options, is_mcq, is_interview, is_random) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {EXAM_COLUMNS}"
    ))
    .bind(client_id)
    .bind(payload.code.trim())
    .bind(payload.name.trim())
    .bind(payload.description.as_deref())
    .bind(SqlJson(payload.options.unwrap_or_default()))
    .bind(payload.is_mcq.unwrap_or(true))
    .bind(payload.is_interview.unwrap_or(false))
    .bind(payload.is_random.unwrap_or(false))
    .fetch_one(pool)
    .await
    .map_err(|e| conflict_or_internal(e, DUPLICATE_EXAM_CODE))
}

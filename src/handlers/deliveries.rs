// src/handlers/deliveries.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use validator::Validate;

use crate::{
    config::DEFAULT_DURATION_MINUTES,
    error::AppError,
    handlers::exams::fetch_exam,
    models::{
        attempt::AttemptStatus,
        delivery::{
            CreateDeliveryRequest, DELIVERY_COLUMNS, Delivery, DeliveryStatus, DeliverySummary,
            DeliveryTakerToken, TakerDelivery, UpdateDeliveryRequest,
        },
    },
    utils::{codes::delivery_token, jwt::Claims},
};

const SUMMARY_SELECT: &str = r#"
    SELECT d.id, d.exam_id, d.group_id, d.name, d.display_name, d.is_anytime, d.scheduled_at,
           d.duration, d.automatic_start, d.is_finished, d.ended_at, d.created_at, d.updated_at,
           e.name AS exam_name,
           g.name AS group_name,
           (SELECT COUNT(*) FROM attempts a WHERE a.delivery_id = d.id) AS attempt_count
    FROM deliveries d
    JOIN exams e ON e.id = d.exam_id
    LEFT JOIN groups g ON g.id = d.group_id
"#;

#[derive(Debug, Serialize)]
pub struct DeliveryView {
    #[serde(flatten)]
    pub summary: DeliverySummary,
    pub status: DeliveryStatus,
}

impl From<DeliverySummary> for DeliveryView {
    fn from(summary: DeliverySummary) -> Self {
        let status = summary.delivery.status(Utc::now());
        Self { summary, status }
    }
}

#[derive(Debug, Serialize)]
pub struct TakerDeliveryView {
    #[serde(flatten)]
    pub delivery: TakerDelivery,
    pub status: DeliveryStatus,
    pub attempt_status: AttemptStatus,
}

pub(crate) async fn fetch_delivery(pool: &PgPool, id: i64) -> Result<Delivery, AppError> {
    sqlx::query_as::<_, Delivery>(&format!(
        "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Delivery not found".to_string()))
}

/// Lists deliveries, latest schedule first.
pub async fn list_deliveries(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let deliveries = sqlx::query_as::<_, DeliverySummary>(&format!(
        "{SUMMARY_SELECT} ORDER BY d.scheduled_at DESC NULLS LAST, d.id DESC"
    ))
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list deliveries: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(
        deliveries
            .into_iter()
            .map(DeliveryView::from)
            .collect::<Vec<_>>(),
    ))
}

pub async fn get_delivery(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let delivery = sqlx::query_as::<_, DeliverySummary>(&format!("{SUMMARY_SELECT} WHERE d.id = $1"))
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Delivery not found".to_string()))?;

    Ok(Json(DeliveryView::from(delivery)))
}

/// Schedules an exam for a group.
///
/// Every member of the group receives a personal access token.
pub async fn create_delivery(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateDeliveryRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    fetch_exam(&pool, payload.exam_id).await?;

    let mut tx = pool.begin().await?;

    let delivery = sqlx::query_as::<_, Delivery>(&format!(
        "INSERT INTO deliveries \
         (exam_id, group_id, name, display_name, is_anytime, scheduled_at, duration, automatic_start) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {DELIVERY_COLUMNS}"
    ))
    .bind(payload.exam_id)
    .bind(payload.group_id)
    .bind(payload.name.trim())
    .bind(&payload.display_name)
    .bind(payload.is_anytime.unwrap_or(false))
    .bind(payload.scheduled_at)
    .bind(payload.duration.unwrap_or(DEFAULT_DURATION_MINUTES))
    .bind(payload.automatic_start.unwrap_or(true))
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create delivery: {:?}", e);
        if e.as_database_error().is_some_and(|db| db.is_foreign_key_violation()) {
            AppError::BadRequest("Unknown group".to_string())
        } else {
            AppError::from(e)
        }
    })?;

    let issued = match delivery.group_id {
        Some(group_id) => issue_tokens(&mut tx, delivery.id, group_id).await?,
        None => 0,
    };

    tx.commit().await?;

    tracing::info!(
        "Delivery {} created with {} taker tokens",
        delivery.id,
        issued
    );

    Ok((StatusCode::CREATED, Json(delivery)))
}

/// Updates a delivery. Moving it to another group issues tokens to the new members.
pub async fn update_delivery(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateDeliveryRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    if let Some(exam_id) = payload.exam_id {
        fetch_exam(&pool, exam_id).await?;
    }

    let mut tx = pool.begin().await?;

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("UPDATE deliveries SET updated_at = NOW()");

    if let Some(exam_id) = payload.exam_id {
        builder.push(", exam_id = ").push_bind(exam_id);
    }
    if let Some(group_id) = payload.group_id {
        builder.push(", group_id = ").push_bind(group_id);
    }
    if let Some(name) = payload.name {
        builder.push(", name = ").push_bind(name.trim().to_string());
    }
    if let Some(display_name) = payload.display_name {
        builder.push(", display_name = ").push_bind(display_name);
    }
    if let Some(is_anytime) = payload.is_anytime {
        builder.push(", is_anytime = ").push_bind(is_anytime);
    }
    if let Some(scheduled_at) = payload.scheduled_at {
        builder.push(", scheduled_at = ").push_bind(scheduled_at);
    }
    if let Some(duration) = payload.duration {
        builder.push(", duration = ").push_bind(duration);
    }
    if let Some(automatic_start) = payload.automatic_start {
        builder.push(", automatic_start = ").push_bind(automatic_start);
    }
    if let Some(is_finished) = payload.is_finished {
        builder.push(", is_finished = ").push_bind(is_finished);
    }
    if let Some(ended_at) = payload.ended_at {
        builder.push(", ended_at = ").push_bind(ended_at);
    }
    builder.push(" WHERE id = ").push_bind(id);
    builder.push(format!(" RETURNING {DELIVERY_COLUMNS}"));

    let delivery = builder
        .build_query_as::<Delivery>()
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to update delivery: {:?}", e);
            AppError::from(e)
        })?
        .ok_or_else(|| AppError::NotFound("Delivery not found".to_string()))?;

    if let (Some(_), Some(group_id)) = (payload.group_id, delivery.group_id) {
        issue_tokens(&mut tx, delivery.id, group_id).await?;
    }

    tx.commit().await?;

    Ok(Json(delivery))
}

pub async fn delete_delivery(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM deliveries WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete delivery: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Delivery not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Lists the delivery's takers with their access tokens and login flags.
pub async fn list_delivery_takers(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    fetch_delivery(&pool, id).await?;

    let takers = sqlx::query_as::<_, DeliveryTakerToken>(
        r#"
        SELECT t.id AS taker_id, t.reg, t.name, dt.token, dt.is_login
        FROM delivery_takers dt
        JOIN takers t ON t.id = dt.taker_id
        WHERE dt.delivery_id = $1
        ORDER BY t.name
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(takers))
}

/// Lists the logged-in taker's deliveries with their token and attempt state.
pub async fn list_taker_deliveries(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let taker_id = claims.user_id()?;

    let rows = sqlx::query_as::<_, TakerDelivery>(
        r#"
        SELECT d.id, d.exam_id, d.group_id, d.name, d.display_name, d.is_anytime, d.scheduled_at,
               d.duration, d.automatic_start, d.is_finished, d.ended_at, d.created_at, d.updated_at,
               e.name AS exam_name,
               dt.token, dt.is_login,
               a.id AS attempt_id,
               a.started_at AS attempt_started_at,
               a.ended_at AS attempt_ended_at,
               a.finish_scoring AS attempt_scored,
               a.score AS attempt_score
        FROM delivery_takers dt
        JOIN deliveries d ON d.id = dt.delivery_id
        JOIN exams e ON e.id = d.exam_id
        LEFT JOIN attempts a ON a.delivery_id = d.id AND a.attempted_by = dt.taker_id
        WHERE dt.taker_id = $1
        ORDER BY d.scheduled_at DESC NULLS LAST, d.id DESC
        "#,
    )
    .bind(taker_id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list taker deliveries: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    let now = Utc::now();
    let views: Vec<TakerDeliveryView> = rows
        .into_iter()
        .map(|delivery| TakerDeliveryView {
            status: delivery.delivery.status(now),
            attempt_status: AttemptStatus::from_flags(
                delivery.attempt_id.is_some(),
                delivery.attempt_ended_at.is_some(),
                delivery.attempt_scored.unwrap_or(false),
            ),
            delivery,
        })
        .collect();

    Ok(Json(views))
}

/// Issues a token to every group member that has none for this delivery yet.
async fn issue_tokens(
    tx: &mut Transaction<'_, Postgres>,
    delivery_id: i64,
    group_id: i64,
) -> Result<u64, AppError> {
    let taker_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT gt.taker_id FROM group_takers gt \
         JOIN takers t ON t.id = gt.taker_id \
         WHERE gt.group_id = $1 AND t.deleted_at IS NULL",
    )
    .bind(group_id)
    .fetch_all(&mut **tx)
    .await?;

    let mut issued = 0;
    for taker_id in taker_ids {
        issued += sqlx::query(
            "INSERT INTO delivery_takers (delivery_id, taker_id, token) VALUES ($1, $2, $3) \
             ON CONFLICT (delivery_id, taker_id) DO NOTHING",
        )
        .bind(delivery_id)
        .bind(taker_id)
        .bind(delivery_token())
        .execute(&mut **tx)
        .await?
        .rows_affected();
    }

    Ok(issued)
}

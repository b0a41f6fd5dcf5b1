// src/handlers/attempts.rs

use std::{collections::HashMap, net::SocketAddr};

use axum::{
    Extension, Json,
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;

use crate::{
    error::AppError,
    handlers::{
        deliveries::fetch_delivery,
        exams::{fetch_exam, load_exam_items},
        scoring::{ScoreResult, score_attempt},
    },
    models::{
        attempt::{
            ATTEMPT_COLUMNS, ATTEMPT_QUESTION_COLUMNS, Attempt, AttemptDetail, AttemptQuestion,
            ItemAnswer, StartAttemptRequest, SubmitAnswersRequest, progress_percent,
            seeded_shuffle,
        },
        question::PublicItem,
    },
    utils::jwt::Claims,
};

/// Starts (or resumes) the caller's attempt for a delivery.
///
/// Returns 201 for a new attempt and 200 with the existing one otherwise.
pub async fn start_attempt(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<StartAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let taker_id = claims.user_id()?;
    let delivery = fetch_delivery(&pool, payload.delivery_id).await?;

    let token: Option<String> = sqlx::query_scalar(
        "SELECT token FROM delivery_takers WHERE delivery_id = $1 AND taker_id = $2",
    )
    .bind(delivery.id)
    .bind(taker_id)
    .fetch_optional(&pool)
    .await?;

    let token = token.ok_or_else(|| {
        AppError::Forbidden("You are not registered for this delivery".to_string())
    })?;

    if let Some(supplied) = payload.token.as_deref() {
        if !supplied.trim().eq_ignore_ascii_case(&token) {
            return Err(AppError::Forbidden("Invalid delivery token".to_string()));
        }
    }

    if let Some(reason) = delivery.start_blocker(Utc::now()) {
        return Err(AppError::Conflict(reason.to_string()));
    }

    if let Some(existing) = find_attempt(&pool, delivery.id, taker_id).await? {
        return Ok((StatusCode::OK, Json(existing)));
    }

    let ip_address = client_ip(&headers, addr);

    let created = sqlx::query_as::<_, Attempt>(&format!(
        "INSERT INTO attempts (attempted_by, exam_id, delivery_id, ip_address) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (delivery_id, attempted_by) DO NOTHING \
         RETURNING {ATTEMPT_COLUMNS}"
    ))
    .bind(taker_id)
    .bind(delivery.exam_id)
    .bind(delivery.id)
    .bind(&ip_address)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to start attempt: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    // A concurrent request won the insert.
    let Some(attempt) = created else {
        let existing = find_attempt(&pool, delivery.id, taker_id)
            .await?
            .ok_or_else(|| AppError::InternalServerError("Attempt vanished".to_string()))?;
        return Ok((StatusCode::OK, Json(existing)));
    };

    sqlx::query("UPDATE delivery_takers SET is_login = TRUE WHERE delivery_id = $1 AND taker_id = $2")
        .bind(delivery.id)
        .bind(taker_id)
        .execute(&pool)
        .await?;

    tracing::info!(
        "Taker {} started attempt {} for delivery {} from {}",
        taker_id,
        attempt.id,
        delivery.id,
        ip_address
    );

    Ok((StatusCode::CREATED, Json(attempt)))
}

/// Returns the attempt with its saved answers and remaining time.
pub async fn get_attempt(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = owned_attempt(&pool, id, claims.user_id()?).await?;

    let (taker_name, exam_name, delivery_name, duration): (String, String, String, i32) =
        sqlx::query_as(
            r#"
            SELECT t.name, e.name, COALESCE(d.display_name, d.name), d.duration
            FROM attempts a
            JOIN takers t ON t.id = a.attempted_by
            JOIN exams e ON e.id = a.exam_id
            JOIN deliveries d ON d.id = a.delivery_id
            WHERE a.id = $1
            "#,
        )
        .bind(attempt.id)
        .fetch_one(&pool)
        .await?;

    let answers = sqlx::query_as::<_, AttemptQuestion>(&format!(
        "SELECT {ATTEMPT_QUESTION_COLUMNS} FROM attempt_questions \
         WHERE attempt_id = $1 ORDER BY question_id"
    ))
    .bind(attempt.id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(AttemptDetail {
        status: attempt.status(),
        remaining_seconds: attempt.remaining_seconds(duration, Utc::now()),
        taker_name,
        exam_name,
        delivery_name,
        duration,
        answers,
        attempt,
    }))
}

/// Returns the exam content for taking, without correct-answer flags.
///
/// Items, questions and options flagged random come back in an order that
/// is shuffled once per attempt and stable across reloads.
pub async fn get_attempt_items(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = owned_attempt(&pool, id, claims.user_id()?).await?;
    let exam = fetch_exam(&pool, attempt.exam_id).await?;
    let mut items = load_exam_items(&pool, exam.id).await?;

    if exam.is_random || exam.options.randomize_questions == Some(true) {
        seeded_shuffle(&mut items, attempt.id, 0);
    }

    let randomize_answers = exam.options.randomize_answers == Some(true);
    for item in &mut items {
        if item.item.is_random {
            seeded_shuffle(&mut item.questions, attempt.id, item.item.id);
        }
        for question in &mut item.questions {
            if randomize_answers || question.question.is_random {
                seeded_shuffle(&mut question.answers, attempt.id, -question.question.id);
            }
        }
    }

    Ok(Json(items.iter().map(PublicItem::from).collect::<Vec<_>>()))
}

/// Saves answers for an in-progress attempt.
///
/// Past the deadline the attempt is closed instead and 409 is returned.
pub async fn submit_answers(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<SubmitAnswersRequest>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = owned_attempt(&pool, id, claims.user_id()?).await?;

    if attempt.is_finished() {
        return Err(AppError::Conflict("Attempt already finished".to_string()));
    }

    let delivery = fetch_delivery(&pool, attempt.delivery_id).await?;
    if attempt.is_overdue(delivery.duration, Utc::now()) {
        close_attempt(&pool, &attempt).await?;
        return Err(AppError::Conflict(
            "Time is up; the attempt has been submitted".to_string(),
        ));
    }

    let options = exam_answer_options(&pool, attempt.exam_id).await?;

    let mut rows: Vec<(i64, Option<i64>, String)> = Vec::new();
    for (question_id, value) in payload.answers {
        let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) else {
            continue;
        };

        let answer_ids = options.get(&question_id).ok_or_else(|| {
            AppError::BadRequest(format!("Question {} is not part of this exam", question_id))
        })?;

        let answer_id = value
            .parse::<i64>()
            .ok()
            .filter(|candidate| answer_ids.contains(candidate));

        rows.push((question_id, answer_id, value));
    }

    let mut tx = pool.begin().await?;

    // Holds off a concurrent finish until these answers are in.
    let still_open: bool =
        sqlx::query_scalar("SELECT ended_at IS NULL FROM attempts WHERE id = $1 FOR UPDATE")
            .bind(attempt.id)
            .fetch_one(&mut *tx)
            .await?;

    if !still_open {
        return Err(AppError::Conflict("Attempt already finished".to_string()));
    }

    for (question_id, answer_id, value) in rows {
        sqlx::query(
            r#"
            INSERT INTO attempt_questions (attempt_id, question_id, answer_id, answer)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (attempt_id, question_id)
            DO UPDATE SET answer_id = EXCLUDED.answer_id,
                          answer = EXCLUDED.answer,
                          updated_at = NOW()
            "#,
        )
        .bind(attempt.id)
        .bind(question_id)
        .bind(answer_id)
        .bind(value)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to save answer: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;
    }

    let answered: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM attempt_questions WHERE attempt_id = $1 AND answer IS NOT NULL",
    )
    .bind(attempt.id)
    .fetch_one(&mut *tx)
    .await?;

    let progress = progress_percent(answered, options.len() as i64);

    sqlx::query("UPDATE attempts SET progress = $1, updated_at = NOW() WHERE id = $2")
        .bind(progress)
        .bind(attempt.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(Json(json!({ "success": true, "progress": progress })))
}

/// Saved answers for every question of one item; unanswered questions are null.
pub async fn get_item_answers(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path((id, item_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = owned_attempt(&pool, id, claims.user_id()?).await?;

    let linked: Option<i64> =
        sqlx::query_scalar("SELECT item_id FROM exam_items WHERE exam_id = $1 AND item_id = $2")
            .bind(attempt.exam_id)
            .bind(item_id)
            .fetch_optional(&pool)
            .await?;

    if linked.is_none() {
        return Err(AppError::NotFound("Item is not part of this exam".to_string()));
    }

    let answers = sqlx::query_as::<_, ItemAnswer>(
        r#"
        SELECT q.id AS question_id, aq.answer_id, aq.answer
        FROM questions q
        LEFT JOIN attempt_questions aq ON aq.question_id = q.id AND aq.attempt_id = $1
        WHERE q.item_id = $2
        ORDER BY q."order", q.id
        "#,
    )
    .bind(attempt.id)
    .bind(item_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(answers))
}

/// Submits the attempt. Multiple-choice exams are scored right away.
pub async fn finish_attempt(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = owned_attempt(&pool, id, claims.user_id()?).await?;

    if attempt.is_finished() {
        return Err(AppError::Conflict("Attempt already finished".to_string()));
    }

    let result = close_attempt(&pool, &attempt).await?;
    let attempt = owned_attempt(&pool, id, attempt.attempted_by).await?;

    Ok(Json(json!({
        "attempt": attempt,
        "status": attempt.status(),
        "result": result,
    })))
}

/// Sets `ended_at` and scores multiple-choice exams.
async fn close_attempt(
    pool: &PgPool,
    attempt: &Attempt,
) -> Result<Option<ScoreResult>, AppError> {
    let closed = sqlx::query(
        "UPDATE attempts SET ended_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND ended_at IS NULL",
    )
    .bind(attempt.id)
    .execute(pool)
    .await?;

    if closed.rows_affected() == 0 {
        return Err(AppError::Conflict("Attempt already finished".to_string()));
    }

    tracing::info!("Attempt {} submitted", attempt.id);

    let exam = fetch_exam(pool, attempt.exam_id).await?;
    if !exam.is_mcq {
        return Ok(None);
    }

    Ok(Some(score_attempt(pool, attempt.id).await?))
}

async fn find_attempt(
    pool: &PgPool,
    delivery_id: i64,
    taker_id: i64,
) -> Result<Option<Attempt>, AppError> {
    Ok(sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE delivery_id = $1 AND attempted_by = $2"
    ))
    .bind(delivery_id)
    .bind(taker_id)
    .fetch_optional(pool)
    .await?)
}

async fn owned_attempt(pool: &PgPool, id: i64, taker_id: i64) -> Result<Attempt, AppError> {
    let attempt = sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;

    if attempt.attempted_by != taker_id {
        return Err(AppError::Forbidden(
            "This attempt belongs to another taker".to_string(),
        ));
    }

    Ok(attempt)
}

/// Every question of the exam with the ids of its answer options.
async fn exam_answer_options(
    pool: &PgPool,
    exam_id: i64,
) -> Result<HashMap<i64, Vec<i64>>, AppError> {
    let rows: Vec<(i64, Vec<i64>)> = sqlx::query_as(
        r#"
        SELECT q.id, COALESCE(ARRAY_AGG(a.id) FILTER (WHERE a.id IS NOT NULL), '{}')
        FROM exam_items ei
        JOIN questions q ON q.item_id = ei.item_id
        LEFT JOIN answers a ON a.question_id = q.id
        WHERE ei.exam_id = $1
        GROUP BY q.id
        "#,
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

/// First `X-Forwarded-For` hop when behind a proxy, else the socket peer.
fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| addr.ip().to_string())
}

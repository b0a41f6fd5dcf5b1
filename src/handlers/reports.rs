// src/handlers/reports.rs

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::{
    error::AppError,
    handlers::{scoring::percentage, settings::load_site_settings},
    models::attempt::AttemptStatus,
    utils::pagination::{Paginated, PaginationParams},
};

/// Maximum attainable score per exam.
const EXAM_MAX_CTE: &str = r#"
    WITH exam_max AS (
        SELECT ei.exam_id, COALESCE(SUM(q.score), 0)::INT AS max_score
        FROM exam_items ei
        JOIN questions q ON q.item_id = ei.item_id
        GROUP BY ei.exam_id
    )
"#;

/// A finished attempt reduced to what pass/fail statistics need.
#[derive(Debug, Clone, FromRow)]
pub struct ScoredAttempt {
    pub score: i32,
    pub max_score: i32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct PeriodStats {
    pub total_attempts: i64,
    pub average_score: Option<f64>,
    pub passed: i64,
    pub failed: i64,
    pub passing_rate: Option<f64>,
    pub average_duration_seconds: Option<i64>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Aggregates scored attempts against a passing percentage.
pub fn summarize(attempts: &[ScoredAttempt], passing_score: i64) -> PeriodStats {
    if attempts.is_empty() {
        return PeriodStats::default();
    }

    let count = attempts.len() as f64;
    let passed = attempts
        .iter()
        .filter(|a| percentage(a.score, a.max_score) >= passing_score)
        .count() as i64;

    let durations: Vec<i64> = attempts
        .iter()
        .filter_map(|a| a.ended_at.map(|end| (end - a.started_at).num_seconds().max(0)))
        .collect();

    let total_score: i64 = attempts.iter().map(|a| i64::from(a.score)).sum();

    PeriodStats {
        total_attempts: attempts.len() as i64,
        average_score: Some(round2(total_score as f64 / count)),
        passed,
        failed: attempts.len() as i64 - passed,
        passing_rate: Some(round2(passed as f64 / count * 100.0)),
        average_duration_seconds: (!durations.is_empty())
            .then(|| durations.iter().sum::<i64>() / durations.len() as i64),
    }
}

#[derive(Debug, FromRow, Serialize)]
pub struct RecentAttempt {
    pub id: i64,
    pub taker_name: String,
    pub exam_name: String,
    pub score: i32,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow, Serialize)]
pub struct CategoryShare {
    pub id: i64,
    pub name: String,
    pub question_count: i64,
}

/// Overview numbers for the admin dashboard.
pub async fn dashboard(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let settings = load_site_settings(&pool).await?;

    let (total_takers, total_questions, active_attempts, finished_today): (i64, i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM takers WHERE deleted_at IS NULL),
                (SELECT COUNT(*) FROM questions),
                (SELECT COUNT(*) FROM attempts WHERE ended_at IS NULL),
                (SELECT COUNT(*) FROM attempts WHERE ended_at::DATE = CURRENT_DATE)
            "#,
        )
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load dashboard counts: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    let recent = sqlx::query_as::<_, RecentAttempt>(
        r#"
        SELECT a.id, t.name AS taker_name, e.name AS exam_name, a.score, a.ended_at
        FROM attempts a
        JOIN takers t ON t.id = a.attempted_by
        JOIN exams e ON e.id = a.exam_id
        WHERE a.ended_at IS NOT NULL
        ORDER BY a.ended_at DESC
        LIMIT 5
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let scored = sqlx::query_as::<_, ScoredAttempt>(&format!(
        "{EXAM_MAX_CTE} \
         SELECT a.score, COALESCE(m.max_score, 0) AS max_score, a.started_at, a.ended_at \
         FROM attempts a LEFT JOIN exam_max m ON m.exam_id = a.exam_id \
         WHERE a.finish_scoring = TRUE"
    ))
    .fetch_all(&pool)
    .await?;

    let categories = sqlx::query_as::<_, CategoryShare>(
        r#"
        SELECT c.id, c.name, COUNT(qc.question_id) AS question_count
        FROM categories c
        LEFT JOIN question_categories qc ON qc.category_id = c.id
        WHERE c.deleted_at IS NULL
        GROUP BY c.id
        ORDER BY question_count DESC, c.name
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let stats = summarize(&scored, settings.passing_score);

    Ok(Json(serde_json::json!({
        "total_takers": total_takers,
        "total_questions": total_questions,
        "active_attempts": active_attempts,
        "finished_today": finished_today,
        "recent_attempts": recent,
        "average_score": stats.average_score,
        "passing_rate": stats.passing_rate,
        "passing_score": settings.passing_score,
        "category_distribution": categories,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub exam_id: Option<i64>,
    pub taker_id: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, FromRow, Serialize)]
pub struct ResultRow {
    pub id: i64,
    pub exam_id: i64,
    pub exam_name: String,
    pub taker_id: i64,
    pub taker_name: String,
    pub taker_reg: String,
    pub delivery_id: i64,
    pub score: i32,
    pub progress: i32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub finish_scoring: bool,
    pub correct_count: i64,
    pub wrong_count: i64,
    pub question_count: i64,
}

#[derive(Debug, Serialize)]
pub struct ResultView {
    #[serde(flatten)]
    pub row: ResultRow,
    pub unanswered_count: i64,
    pub duration_seconds: Option<i64>,
    pub status: AttemptStatus,
}

impl From<ResultRow> for ResultView {
    fn from(row: ResultRow) -> Self {
        Self {
            unanswered_count: (row.question_count - row.correct_count - row.wrong_count).max(0),
            duration_seconds: row
                .ended_at
                .map(|end| (end - row.started_at).num_seconds().max(0)),
            status: AttemptStatus::from_flags(true, row.ended_at.is_some(), row.finish_scoring),
            row,
        }
    }
}

const RESULT_SELECT: &str = r#"
    SELECT a.id, a.exam_id, e.name AS exam_name,
           a.attempted_by AS taker_id, t.name AS taker_name, t.reg AS taker_reg,
           a.delivery_id, a.score, a.progress, a.started_at, a.ended_at, a.finish_scoring,
           COUNT(aq.id) FILTER (WHERE aq.is_correct) AS correct_count,
           COUNT(aq.id) FILTER (WHERE NOT aq.is_correct AND aq.answer IS NOT NULL) AS wrong_count,
           (SELECT COUNT(*) FROM exam_items ei JOIN questions q ON q.item_id = ei.item_id
             WHERE ei.exam_id = a.exam_id) AS question_count
    FROM attempts a
    JOIN exams e ON e.id = a.exam_id
    JOIN takers t ON t.id = a.attempted_by
    LEFT JOIN attempt_questions aq ON aq.attempt_id = a.id
"#;

const RESULT_FILTER: &str = r#"
    WHERE ($1::BIGINT IS NULL OR a.exam_id = $1)
      AND ($2::BIGINT IS NULL OR a.attempted_by = $2)
      AND ($3::DATE IS NULL OR a.started_at::DATE >= $3)
      AND ($4::DATE IS NULL OR a.started_at::DATE <= $4)
"#;

/// Lists attempts with answer counts, newest first.
pub async fn list_results(
    State(pool): State<PgPool>,
    Query(query): Query<ResultsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let paging = PaginationParams {
        page: query.page,
        limit: query.limit,
    };

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM attempts a {RESULT_FILTER}"))
        .bind(query.exam_id)
        .bind(query.taker_id)
        .bind(query.date_from)
        .bind(query.date_to)
        .fetch_one(&pool)
        .await?;

    let rows = sqlx::query_as::<_, ResultRow>(&format!(
        "{RESULT_SELECT} {RESULT_FILTER} \
         GROUP BY a.id, e.name, t.name, t.reg \
         ORDER BY a.started_at DESC, a.id DESC LIMIT $5 OFFSET $6"
    ))
    .bind(query.exam_id)
    .bind(query.taker_id)
    .bind(query.date_from)
    .bind(query.date_to)
    .bind(paging.limit())
    .bind(paging.offset())
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list results: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(Paginated {
        items: rows.into_iter().map(ResultView::from).collect(),
        pagination: paging.meta(total),
    }))
}

#[derive(Debug, FromRow, Serialize)]
pub struct ResultAnswer {
    pub question_id: i64,
    pub question: String,
    pub answer_id: Option<i64>,
    pub answer: Option<String>,
    pub selected_answer: Option<String>,
    pub correct_answers: Vec<String>,
    pub is_correct: bool,
    pub score: i32,
    pub max_score: i32,
}

/// One attempt with every exam question and what the taker answered.
pub async fn get_result(
    State(pool): State<PgPool>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let row = sqlx::query_as::<_, ResultRow>(&format!(
        "{RESULT_SELECT} WHERE a.id = $1 GROUP BY a.id, e.name, t.name, t.reg"
    ))
    .bind(attempt_id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Result not found".to_string()))?;

    let answers = sqlx::query_as::<_, ResultAnswer>(
        r#"
        SELECT q.id AS question_id,
               q.question,
               aq.answer_id,
               aq.answer,
               sa.answer AS selected_answer,
               ARRAY(SELECT c.answer FROM answers c
                     WHERE c.question_id = q.id AND c.is_correct_answer
                     ORDER BY c.id) AS correct_answers,
               COALESCE(aq.is_correct, FALSE) AS is_correct,
               COALESCE(aq.score, 0) AS score,
               q.score AS max_score
        FROM exam_items ei
        JOIN questions q ON q.item_id = ei.item_id
        LEFT JOIN attempt_questions aq ON aq.question_id = q.id AND aq.attempt_id = $1
        LEFT JOIN answers sa ON sa.id = aq.answer_id
        WHERE ei.exam_id = $2
        ORDER BY ei.position, q."order", q.id
        "#,
    )
    .bind(row.id)
    .bind(row.exam_id)
    .fetch_all(&pool)
    .await?;

    let max_score: i32 = answers.iter().map(|a| a.max_score).sum();
    let percent = percentage(row.score, max_score);

    Ok(Json(serde_json::json!({
        "result": ResultView::from(row),
        "max_score": max_score,
        "percentage": percent,
        "answers": answers,
    })))
}

/// Last 30 days of scored attempts, plus today's activity.
pub async fn result_statistics(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let settings = load_site_settings(&pool).await?;

    let recent = sqlx::query_as::<_, ScoredAttempt>(&format!(
        "{EXAM_MAX_CTE} \
         SELECT a.score, COALESCE(m.max_score, 0) AS max_score, a.started_at, a.ended_at \
         FROM attempts a LEFT JOIN exam_max m ON m.exam_id = a.exam_id \
         WHERE a.finish_scoring = TRUE AND a.ended_at >= NOW() - INTERVAL '30 days'"
    ))
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to load statistics: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    let (today_attempts, today_takers): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(DISTINCT attempted_by) FROM attempts \
         WHERE started_at::DATE = CURRENT_DATE",
    )
    .fetch_one(&pool)
    .await?;

    Ok(Json(serde_json::json!({
        "last_30_days": summarize(&recent, settings.passing_score),
        "today": {
            "attempts": today_attempts,
            "unique_takers": today_takers,
        },
        "passing_score": settings.passing_score,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn attempt(score: i32, max_score: i32, minutes: i64) -> ScoredAttempt {
        let started_at = Utc::now();
        ScoredAttempt {
            score,
            max_score,
            started_at,
            ended_at: Some(started_at + Duration::minutes(minutes)),
        }
    }

    #[test]
    fn empty_period_has_no_averages() {
        let stats = summarize(&[], 70);
        assert_eq!(stats.total_attempts, 0);
        assert_eq!(stats.average_score, None);
        assert_eq!(stats.passing_rate, None);
    }

    #[test]
    fn pass_fail_uses_percentage_of_max() {
        let stats = summarize(
            &[attempt(7, 10, 30), attempt(6, 10, 60), attempt(3, 4, 90)],
            70,
        );
        assert_eq!(stats.passed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.passing_rate, Some(66.67));
        assert_eq!(stats.average_duration_seconds, Some(3600));
    }
}

// src/handlers/scoring.rs

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

use crate::{
    config::DEFAULT_PASSING_SCORE,
    error::AppError,
    handlers::{deliveries::fetch_delivery, exams::fetch_exam, settings::load_site_settings},
    models::{
        attempt::{ATTEMPT_COLUMNS, Attempt, AttemptStatus},
        exam::ExamOptions,
    },
};

/// Answer key for one exam question.
#[derive(Debug, Clone, FromRow)]
pub struct QuestionKey {
    pub question_id: i64,
    pub max_score: i32,
    pub correct_answer_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionScore {
    pub question_id: i64,
    pub score: i32,
    pub max_score: i32,
    pub is_correct: bool,
}

#[derive(Debug, Serialize)]
pub struct ScoreResult {
    pub attempt_id: i64,
    pub total_score: i32,
    pub max_score: i32,
    pub percentage: i64,
    pub passed: bool,
    pub details: Vec<QuestionScore>,
}

/// Scores every exam question against the selected options.
///
/// Unanswered questions earn nothing but still count towards the maximum.
pub fn score_questions(
    keys: &[QuestionKey],
    selected: &HashMap<i64, i64>,
) -> (Vec<QuestionScore>, i32, i32) {
    let mut total = 0;
    let mut max = 0;

    let details = keys
        .iter()
        .map(|key| {
            let is_correct = selected
                .get(&key.question_id)
                .is_some_and(|answer_id| key.correct_answer_ids.contains(answer_id));
            let score = if is_correct { key.max_score } else { 0 };

            total += score;
            max += key.max_score;

            QuestionScore {
                question_id: key.question_id,
                score,
                max_score: key.max_score,
                is_correct,
            }
        })
        .collect();

    (details, total, max)
}

/// `round(total / max * 100)`, or 0 when there is nothing to score.
pub fn percentage(total: i32, max: i32) -> i64 {
    if max <= 0 {
        return 0;
    }
    ((f64::from(total) / f64::from(max)) * 100.0).round() as i64
}

/// Exam option first, then the site setting.
pub fn passing_threshold(options: &ExamOptions, site_passing_score: Option<i64>) -> i64 {
    options
        .passing_score
        .or(site_passing_score)
        .unwrap_or(DEFAULT_PASSING_SCORE)
}

/// Scores a multiple-choice attempt and stores the per-question and total scores.
pub(crate) async fn score_attempt(pool: &PgPool, attempt_id: i64) -> Result<ScoreResult, AppError> {
    let attempt = sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE id = $1"
    ))
    .bind(attempt_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;

    let exam = fetch_exam(pool, attempt.exam_id).await?;
    if !exam.is_mcq {
        return Err(AppError::BadRequest(
            "Automatic scoring is only available for multiple-choice exams".to_string(),
        ));
    }

    let keys = sqlx::query_as::<_, QuestionKey>(
        r#"
        SELECT q.id AS question_id,
               q.score AS max_score,
               COALESCE(ARRAY_AGG(a.id ORDER BY a.id) FILTER (WHERE a.is_correct_answer), '{}')
                   AS correct_answer_ids
        FROM exam_items ei
        JOIN questions q ON q.item_id = ei.item_id
        LEFT JOIN answers a ON a.question_id = q.id
        WHERE ei.exam_id = $1
        GROUP BY q.id, q.score
        ORDER BY q.id
        "#,
    )
    .bind(exam.id)
    .fetch_all(pool)
    .await?;

    let selected: HashMap<i64, i64> = sqlx::query_as::<_, (i64, i64)>(
        "SELECT question_id, answer_id FROM attempt_questions \
         WHERE attempt_id = $1 AND answer_id IS NOT NULL",
    )
    .bind(attempt.id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .collect();

    let (details, total, max) = score_questions(&keys, &selected);

    let mut tx = pool.begin().await?;

    for detail in &details {
        sqlx::query(
            "UPDATE attempt_questions SET is_correct = $1, score = $2, updated_at = NOW() \
             WHERE attempt_id = $3 AND question_id = $4",
        )
        .bind(detail.is_correct)
        .bind(detail.score)
        .bind(attempt.id)
        .bind(detail.question_id)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        "UPDATE attempts SET score = $1, finish_scoring = TRUE, updated_at = NOW() WHERE id = $2",
    )
    .bind(total)
    .bind(attempt.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let settings = load_site_settings(pool).await?;
    let threshold = passing_threshold(&exam.options, Some(settings.passing_score));
    let percentage = percentage(total, max);

    tracing::info!(
        "Attempt {} scored {}/{} ({}%)",
        attempt.id,
        total,
        max,
        percentage
    );

    Ok(ScoreResult {
        attempt_id: attempt.id,
        total_score: total,
        max_score: max,
        percentage,
        passed: percentage >= threshold,
        details,
    })
}

/// Scores a multiple-choice attempt on demand.
/// Admin only.
pub async fn auto_score_mcq(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(score_attempt(&pool, id).await?))
}

#[derive(Debug, FromRow)]
struct SummaryAttemptRow {
    id: i64,
    taker_name: String,
    score: i32,
    progress: i32,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    finish_scoring: bool,
}

#[derive(Debug, Serialize)]
pub struct SummaryAttempt {
    pub id: i64,
    pub taker_name: String,
    pub score: i32,
    pub progress: i32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: AttemptStatus,
}

#[derive(Debug, Serialize)]
pub struct DeliverySummaryReport {
    pub delivery_id: i64,
    pub total_takers: i64,
    pub started: i64,
    pub completed: i64,
    pub scored: i64,
    pub average_score: Option<f64>,
    pub highest_score: Option<i32>,
    pub lowest_score: Option<i32>,
    pub attempts: Vec<SummaryAttempt>,
}

/// Score statistics for a delivery. Aggregates are null until an attempt is scored.
/// Admin only.
pub async fn delivery_summary(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let delivery = fetch_delivery(&pool, id).await?;

    let total_takers: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM delivery_takers WHERE delivery_id = $1")
            .bind(delivery.id)
            .fetch_one(&pool)
            .await?;

    let rows = sqlx::query_as::<_, SummaryAttemptRow>(
        r#"
        SELECT a.id, t.name AS taker_name, a.score, a.progress, a.started_at, a.ended_at,
               a.finish_scoring
        FROM attempts a
        JOIN takers t ON t.id = a.attempted_by
        WHERE a.delivery_id = $1
        ORDER BY a.score DESC, t.name
        "#,
    )
    .bind(delivery.id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to load delivery summary: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    let scored: Vec<i32> = rows
        .iter()
        .filter(|r| r.finish_scoring)
        .map(|r| r.score)
        .collect();

    let average_score = (!scored.is_empty()).then(|| {
        let sum: i64 = scored.iter().map(|s| i64::from(*s)).sum();
        ((sum as f64 / scored.len() as f64) * 100.0).round() / 100.0
    });

    Ok(Json(DeliverySummaryReport {
        delivery_id: delivery.id,
        total_takers: total_takers.max(rows.len() as i64),
        started: rows.len() as i64,
        completed: rows.iter().filter(|r| r.ended_at.is_some()).count() as i64,
        scored: scored.len() as i64,
        average_score,
        highest_score: scored.iter().copied().max(),
        lowest_score: scored.iter().copied().min(),
        attempts: rows
            .into_iter()
            .map(|r| SummaryAttempt {
                status: AttemptStatus::from_flags(true, r.ended_at.is_some(), r.finish_scoring),
                id: r.id,
                taker_name: r.taker_name,
                score: r.score,
                progress: r.progress,
                started_at: r.started_at,
                ended_at: r.ended_at,
            })
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(question_id: i64, max_score: i32, correct: &[i64]) -> QuestionKey {
        QuestionKey {
            question_id,
            max_score,
            correct_answer_ids: correct.to_vec(),
        }
    }

    #[test]
    fn test_score_questions_all_correct() {
        let keys = vec![key(1, 2, &[10]), key(2, 3, &[20])];
        let selected = HashMap::from([(1, 10), (2, 20)]);

        let (details, total, max) = score_questions(&keys, &selected);
        assert_eq!((total, max), (5, 5));
        assert!(details.iter().all(|d| d.is_correct));
    }

    #[test]
    fn test_score_questions_counts_unanswered_in_max() {
        let keys = vec![key(1, 1, &[10]), key(2, 1, &[20]), key(3, 1, &[30])];
        let selected = HashMap::from([(1, 10), (2, 21)]);

        let (details, total, max) = score_questions(&keys, &selected);
        assert_eq!((total, max), (1, 3));
        assert_eq!(
            details[1],
            QuestionScore {
                question_id: 2,
                score: 0,
                max_score: 1,
                is_correct: false
            }
        );
        assert!(!details[2].is_correct);
    }

    #[test]
    fn test_any_correct_option_counts() {
        let keys = vec![key(1, 4, &[10, 11])];
        let (_, total, _) = score_questions(&keys, &HashMap::from([(1, 11)]));
        assert_eq!(total, 4);
    }

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(5, 5), 100);
    }

    #[test]
    fn test_passing_threshold_precedence() {
        let with_option = ExamOptions {
            passing_score: Some(60),
            ..Default::default()
        };
        assert_eq!(passing_threshold(&with_option, Some(80)), 60);
        assert_eq!(passing_threshold(&ExamOptions::default(), Some(80)), 80);
        assert_eq!(passing_threshold(&ExamOptions::default(), None), 70);
    }
}

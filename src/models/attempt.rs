// src/models/attempt.rs

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    NotStarted,
    InProgress,
    Submitted,
    Scored,
}

impl AttemptStatus {
    pub fn from_flags(started: bool, ended: bool, scored: bool) -> Self {
        match (started, ended, scored) {
            (false, _, _) => AttemptStatus::NotStarted,
            (true, _, true) => AttemptStatus::Scored,
            (true, true, false) => AttemptStatus::Submitted,
            (true, false, false) => AttemptStatus::InProgress,
        }
    }
}

/// Represents the 'attempts' table: one taker's run through a delivery.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Attempt {
    pub id: i64,
    /// Taker id.
    pub attempted_by: i64,
    pub exam_id: i64,
    pub delivery_id: i64,
    pub ip_address: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Extra time granted on top of the delivery duration.
    pub extra_minute: i32,
    pub score: i32,
    /// Percentage of exam questions answered.
    pub progress: i32,
    pub penalty: i32,
    pub finish_scoring: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const ATTEMPT_COLUMNS: &str = "id, attempted_by, exam_id, delivery_id, ip_address, started_at, \
                                   ended_at, extra_minute, score, progress, penalty, \
                                   finish_scoring, created_at, updated_at";

impl Attempt {
    pub fn status(&self) -> AttemptStatus {
        AttemptStatus::from_flags(true, self.ended_at.is_some(), self.finish_scoring)
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Instant after which answers are no longer accepted.
    pub fn deadline(&self, duration_minutes: i32) -> DateTime<Utc> {
        self.started_at + Duration::minutes(i64::from(duration_minutes + self.extra_minute))
    }

    pub fn remaining_seconds(&self, duration_minutes: i32, now: DateTime<Utc>) -> i64 {
        if self.is_finished() {
            return 0;
        }
        (self.deadline(duration_minutes) - now).num_seconds().max(0)
    }

    pub fn is_overdue(&self, duration_minutes: i32, now: DateTime<Utc>) -> bool {
        !self.is_finished() && now >= self.deadline(duration_minutes)
    }
}

/// Represents the 'attempt_questions' table: a saved answer.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AttemptQuestion {
    pub id: i64,
    pub attempt_id: i64,
    pub question_id: i64,
    /// Selected option for choice questions.
    pub answer_id: Option<i64>,
    /// Raw submitted value (option id or free text).
    pub answer: Option<String>,
    pub is_correct: bool,
    pub score: i32,
}

pub const ATTEMPT_QUESTION_COLUMNS: &str =
    "id, attempt_id, question_id, answer_id, answer, is_correct, score";

#[derive(Debug, Deserialize)]
pub struct StartAttemptRequest {
    pub delivery_id: i64,
    /// Delivery access token; checked when supplied.
    pub token: Option<String>,
}

/// DTO for saving answers.
///
/// Keys are question ids; `null` or empty values are ignored.
#[derive(Debug, Deserialize)]
pub struct SubmitAnswersRequest {
    pub answers: HashMap<i64, Option<String>>,
}

/// Saved answer for one question of an item.
#[derive(Debug, FromRow, Serialize)]
pub struct ItemAnswer {
    pub question_id: i64,
    pub answer_id: Option<i64>,
    pub answer: Option<String>,
}

/// Attempt detail for the owning taker.
#[derive(Debug, Serialize)]
pub struct AttemptDetail {
    #[serde(flatten)]
    pub attempt: Attempt,
    pub status: AttemptStatus,
    pub remaining_seconds: i64,
    pub taker_name: String,
    pub exam_name: String,
    pub delivery_name: String,
    pub duration: i32,
    pub answers: Vec<AttemptQuestion>,
}

/// Shuffles `values` in place with an RNG seeded from the attempt id and a
/// salt, so the same attempt always sees the same order.
pub fn seeded_shuffle<T>(values: &mut [T], attempt_id: i64, salt: i64) {
    use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

    let seed = (attempt_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ (salt as u64);
    let mut rng = StdRng::seed_from_u64(seed);
    values.shuffle(&mut rng);
}

/// Percentage of answered questions, rounded half away from zero.
pub fn progress_percent(answered: i64, total: i64) -> i32 {
    if total <= 0 {
        return 0;
    }
    ((answered as f64 / total as f64) * 100.0).round().min(100.0) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(started_at: DateTime<Utc>) -> Attempt {
        Attempt {
            id: 1,
            attempted_by: 1,
            exam_id: 1,
            delivery_id: 1,
            ip_address: "0.0.0.0".into(),
            started_at,
            ended_at: None,
            extra_minute: 0,
            score: 0,
            progress: 0,
            penalty: 0,
            finish_scoring: false,
            created_at: started_at,
            updated_at: started_at,
        }
    }

    #[test]
    fn status_transitions() {
        let now = Utc::now();
        let mut a = attempt(now);
        assert_eq!(a.status(), AttemptStatus::InProgress);

        a.ended_at = Some(now);
        assert_eq!(a.status(), AttemptStatus::Submitted);

        a.finish_scoring = true;
        assert_eq!(a.status(), AttemptStatus::Scored);

        assert_eq!(
            AttemptStatus::from_flags(false, false, false),
            AttemptStatus::NotStarted
        );
    }

    #[test]
    fn deadline_includes_extra_minutes() {
        let start = Utc::now();
        let mut a = attempt(start);
        a.extra_minute = 15;

        assert_eq!(a.deadline(60), start + Duration::minutes(75));
        assert_eq!(a.remaining_seconds(60, start + Duration::minutes(70)), 300);
        assert!(!a.is_overdue(60, start + Duration::minutes(74)));
        assert!(a.is_overdue(60, start + Duration::minutes(75)));
    }

    #[test]
    fn finished_attempt_has_no_time_left() {
        let start = Utc::now();
        let mut a = attempt(start);
        a.ended_at = Some(start);
        assert_eq!(a.remaining_seconds(60, start), 0);
        assert!(!a.is_overdue(60, start + Duration::hours(5)));
    }

    #[test]
    fn progress_rounds() {
        assert_eq!(progress_percent(0, 0), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(1, 8), 13);
        assert_eq!(progress_percent(3, 3), 100);
    }

    #[test]
    fn shuffle_is_stable_per_attempt() {
        let mut a: Vec<i32> = (0..20).collect();
        let mut b = a.clone();
        seeded_shuffle(&mut a, 42, 0);
        seeded_shuffle(&mut b, 42, 0);
        assert_eq!(a, b);

        let mut sorted = a.clone();
        sorted.sort();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn submit_answers_accepts_null_values() {
        let req: SubmitAnswersRequest =
            serde_json::from_str(r#"{"answers": {"12": "40", "13": null}}"#).unwrap();
        assert_eq!(req.answers.get(&12), Some(&Some("40".to_string())));
        assert_eq!(req.answers.get(&13), Some(&None));
    }
}

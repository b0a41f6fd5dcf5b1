// src/models/exam.rs

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use validator::Validate;

/// Per-exam behaviour switches, stored in `exams.options` as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExamOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_score: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_correct_answers: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_review: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub randomize_questions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub randomize_answers: Option<bool>,
    /// Percentage needed to pass; overrides the site setting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passing_score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<i64>,
}

/// Represents the 'exams' table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Exam {
    pub id: i64,
    /// Owning tenant; `None` for exams managed globally.
    pub client_id: Option<i64>,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub options: Json<ExamOptions>,
    /// Multiple-choice exams are scored automatically.
    pub is_mcq: bool,
    pub is_interview: bool,
    /// Shuffle item order per attempt.
    pub is_random: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub const EXAM_COLUMNS: &str = "id, client_id, code, name, description, options, is_mcq, \
                                is_interview, is_random, created_at, updated_at";

/// Exam row for listings.
#[derive(Debug, FromRow, Serialize)]
pub struct ExamSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub exam: Exam,
    pub delivery_count: i64,
    pub attempt_count: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateExamRequest {
    #[validate(length(min = 1, max = 50))]
    pub code: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub options: Option<ExamOptions>,
    pub is_mcq: Option<bool>,
    pub is_interview: Option<bool>,
    pub is_random: Option<bool>,
    pub client_id: Option<i64>,
}

/// DTO for updating an exam. Absent fields are left unchanged.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateExamRequest {
    #[validate(length(min = 1, max = 50))]
    pub code: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub options: Option<ExamOptions>,
    pub is_mcq: Option<bool>,
    pub is_interview: Option<bool>,
    pub is_random: Option<bool>,
}

/// DTO for linking an item into an exam.
#[derive(Debug, Deserialize)]
pub struct LinkItemRequest {
    pub item_id: i64,
    /// Appended after the last item when absent.
    pub position: Option<i32>,
}

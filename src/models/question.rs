// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Item types whose questions are answered by picking an option.
pub const CHOICE_ITEM_TYPES: [&str; 2] = ["multiple-choice", "true-false"];
const ITEM_TYPES: [&str; 4] = ["multiple-choice", "essay", "true-false", "matching"];
const QUESTION_TYPES: [&str; 4] = ["single-answer", "multiple-answer", "essay", "short-answer"];

/// Represents the 'items' table: a vignette/scenario grouping one or more questions.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Item {
    pub id: i64,
    pub title: String,
    /// Shared vignette or scenario text (sanitized HTML).
    pub content: Option<String>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub item_type: String,
    pub is_vignette: bool,
    /// Shuffle this item's questions per attempt.
    pub is_random: bool,
    pub score: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Item {
    pub fn is_choice(&self) -> bool {
        CHOICE_ITEM_TYPES.contains(&self.item_type.as_str())
    }
}

pub const ITEM_COLUMNS: &str =
    "id, title, content, type, is_vignette, is_random, score, created_at, updated_at";

/// Represents the 'questions' table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Question {
    pub id: i64,
    pub item_id: i64,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub question_type: String,
    /// Question stem (sanitized HTML).
    pub question: String,
    /// Shuffle this question's answer options per attempt.
    pub is_random: bool,
    /// Points awarded for a correct answer.
    pub score: i32,
    pub order: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub const QUESTION_COLUMNS: &str =
    r#"id, item_id, type, question, is_random, score, "order", created_at, updated_at"#;

/// Represents the 'answers' table: the options of a question.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Answer {
    pub id: i64,
    pub question_id: i64,
    pub answer: String,
    pub is_correct_answer: bool,
}

/// Admin view of a question.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionWithAnswers {
    #[serde(flatten)]
    pub question: Question,
    pub answers: Vec<Answer>,
    pub category_ids: Vec<i64>,
}

/// Admin view of an item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemWithQuestions {
    #[serde(flatten)]
    pub item: Item,
    pub questions: Vec<QuestionWithAnswers>,
}

/// Item row for listings.
#[derive(Debug, FromRow, Serialize)]
pub struct ItemSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub item: Item,
    pub question_count: i64,
}

/// Answer option as sent to a taker (no correctness flag).
#[derive(Debug, Clone, Serialize)]
pub struct PublicAnswer {
    pub id: i64,
    pub answer: String,
}

/// Question as sent to a taker.
#[derive(Debug, Clone, Serialize)]
pub struct PublicQuestion {
    pub id: i64,
    #[serde(rename = "type")]
    pub question_type: String,
    pub question: String,
    pub score: i32,
    pub answers: Vec<PublicAnswer>,
}

/// Item as sent to a taker.
#[derive(Debug, Clone, Serialize)]
pub struct PublicItem {
    pub id: i64,
    pub title: String,
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub item_type: String,
    pub is_vignette: bool,
    pub questions: Vec<PublicQuestion>,
}

impl From<&QuestionWithAnswers> for PublicQuestion {
    fn from(q: &QuestionWithAnswers) -> Self {
        Self {
            id: q.question.id,
            question_type: q.question.question_type.clone(),
            question: q.question.question.clone(),
            score: q.question.score,
            answers: q
                .answers
                .iter()
                .map(|a| PublicAnswer {
                    id: a.id,
                    answer: a.answer.clone(),
                })
                .collect(),
        }
    }
}

impl From<&ItemWithQuestions> for PublicItem {
    fn from(i: &ItemWithQuestions) -> Self {
        Self {
            id: i.item.id,
            title: i.item.title.clone(),
            content: i.item.content.clone(),
            item_type: i.item.item_type.clone(),
            is_vignette: i.item.is_vignette,
            questions: i.questions.iter().map(PublicQuestion::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateItemRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(max = 20000))]
    pub content: Option<String>,
    #[serde(rename = "type")]
    #[validate(custom(function = validate_item_type))]
    pub item_type: Option<String>,
    pub is_vignette: Option<bool>,
    pub is_random: Option<bool>,
    #[validate(range(min = 0))]
    pub score: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateItemRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    #[validate(length(max = 20000))]
    pub content: Option<String>,
    #[serde(rename = "type")]
    #[validate(custom(function = validate_item_type))]
    pub item_type: Option<String>,
    pub is_vignette: Option<bool>,
    pub is_random: Option<bool>,
    #[validate(range(min = 0))]
    pub score: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AnswerRequest {
    #[validate(length(min = 1, max = 5000))]
    pub answer: String,
    #[serde(default)]
    pub is_correct_answer: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    pub item_id: i64,
    #[serde(rename = "type")]
    #[validate(custom(function = validate_question_type))]
    pub question_type: Option<String>,
    #[validate(length(min = 1, max = 20000))]
    pub question: String,
    pub is_random: Option<bool>,
    #[validate(range(min = 0, max = 1000))]
    pub score: Option<i32>,
    pub order: Option<i32>,
    #[serde(default)]
    #[validate(nested)]
    pub answers: Vec<AnswerRequest>,
    #[serde(default)]
    pub category_ids: Vec<i64>,
}

/// DTO for updating a question. `answers` and `category_ids` replace the
/// existing sets when present.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuestionRequest {
    pub item_id: Option<i64>,
    #[serde(rename = "type")]
    #[validate(custom(function = validate_question_type))]
    pub question_type: Option<String>,
    #[validate(length(min = 1, max = 20000))]
    pub question: Option<String>,
    pub is_random: Option<bool>,
    #[validate(range(min = 0, max = 1000))]
    pub score: Option<i32>,
    pub order: Option<i32>,
    #[validate(nested)]
    pub answers: Option<Vec<AnswerRequest>>,
    pub category_ids: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionListParams {
    pub item_id: Option<i64>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn validate_item_type(t: &str) -> Result<(), validator::ValidationError> {
    if !ITEM_TYPES.contains(&t) {
        return Err(validator::ValidationError::new("invalid_item_type"));
    }
    Ok(())
}

fn validate_question_type(t: &str) -> Result<(), validator::ValidationError> {
    if !QUESTION_TYPES.contains(&t) {
        return Err(validator::ValidationError::new("invalid_question_type"));
    }
    Ok(())
}

/// A choice question needs options and at least one of them flagged correct.
pub fn check_choice_answers(answers: &[AnswerRequest]) -> Result<(), &'static str> {
    check_correct_flags(answers.iter().map(|a| a.is_correct_answer))
}

/// Same rule applied to the `is_correct_answer` flags of stored options.
pub fn check_correct_flags(flags: impl IntoIterator<Item = bool>) -> Result<(), &'static str> {
    let mut options = 0;
    let mut any_correct = false;
    for correct in flags {
        options += 1;
        any_correct |= correct;
    }

    if options == 0 {
        return Err("A multiple-choice question needs answer options");
    }
    if !any_correct {
        return Err("At least one answer must be marked correct");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(text: &str, correct: bool) -> AnswerRequest {
        AnswerRequest {
            answer: text.into(),
            is_correct_answer: correct,
        }
    }

    #[test]
    fn choice_answers_need_a_correct_option() {
        assert!(check_choice_answers(&[]).is_err());
        assert!(check_choice_answers(&[answer("A", false), answer("B", false)]).is_err());
        assert!(check_choice_answers(&[answer("A", false), answer("B", true)]).is_ok());
    }

    #[test]
    fn stored_flags_follow_the_same_rule() {
        assert!(check_correct_flags([false; 0]).is_err());
        assert!(check_correct_flags([false, false]).is_err());
        assert!(check_correct_flags([false, true]).is_ok());
    }

    #[test]
    fn item_type_is_validated() {
        let req: CreateItemRequest =
            serde_json::from_str(r#"{"title":"Case 1","type":"crossword"}"#).unwrap();
        assert!(req.validate().is_err());

        let req: CreateItemRequest =
            serde_json::from_str(r#"{"title":"Case 1","type":"true-false"}"#).unwrap();
        assert!(req.validate().is_ok());
    }

    #[test]
    fn public_question_hides_correct_flag() {
        let q = QuestionWithAnswers {
            question: Question {
                id: 1,
                item_id: 1,
                question_type: "single-answer".into(),
                question: "Q".into(),
                is_random: false,
                score: 2,
                order: 0,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            },
            answers: vec![Answer {
                id: 10,
                question_id: 1,
                answer: "A".into(),
                is_correct_answer: true,
            }],
            category_ids: vec![],
        };

        let json = serde_json::to_value(PublicQuestion::from(&q)).unwrap();
        assert_eq!(json["answers"][0], serde_json::json!({"id": 10, "answer": "A"}));
        assert_eq!(json["type"], "single-answer");
    }
}

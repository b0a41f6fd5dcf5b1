// src/handlers/questions.rs

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use validator::Validate;

use crate::{
    error::AppError,
    handlers::items::{attach_answers, fetch_item},
    models::question::{
        AnswerRequest, CreateQuestionRequest, QUESTION_COLUMNS, Question, QuestionListParams,
        QuestionWithAnswers, UpdateQuestionRequest, check_choice_answers,
        check_correct_flags,
    },
    utils::{
        html::clean_html,
        pagination::{Paginated, PaginationParams},
    },
};

/// Lists questions, newest first, optionally restricted to one item.
pub async fn list_questions(
    State(pool): State<PgPool>,
    Query(params): Query<QuestionListParams>,
) -> Result<impl IntoResponse, AppError> {
    let paging = PaginationParams {
        page: params.page,
        limit: params.limit,
    };

    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM questions WHERE ($1::BIGINT IS NULL OR item_id = $1)")
            .bind(params.item_id)
            .fetch_one(&pool)
            .await?;

    let questions = sqlx::query_as::<_, Question>(&format!(
        "SELECT {QUESTION_COLUMNS} FROM questions \
         WHERE ($1::BIGINT IS NULL OR item_id = $1) \
         ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
    ))
    .bind(params.item_id)
    .bind(paging.limit())
    .bind(paging.offset())
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list questions: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(Paginated {
        items: attach_answers(&pool, questions).await?,
        pagination: paging.meta(total),
    }))
}

pub async fn get_question(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(fetch_question(&pool, id).await?))
}

/// Creates a question with its answer options and category tags.
///
/// Questions of a choice item must have at least one correct answer.
pub async fn create_question(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let item = fetch_item(&pool, payload.item_id).await?;
    if item.is_choice() {
        check_choice_answers(&payload.answers).map_err(|m| AppError::BadRequest(m.to_string()))?;
    }

    let mut tx = pool.begin().await?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO questions (item_id, type, question, is_random, score, "order")
        VALUES ($1, $2, $3, $4, $5,
                COALESCE($6, (SELECT COALESCE(MAX("order"), 0) + 1 FROM questions WHERE item_id = $1)))
        RETURNING id
        "#,
    )
    .bind(item.id)
    .bind(payload.question_type.as_deref().unwrap_or("single-answer"))
    .bind(clean_html(&payload.question))
    .bind(payload.is_random.unwrap_or(false))
    .bind(payload.score.unwrap_or(1))
    .bind(payload.order)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create question: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    insert_answers(&mut tx, id, &payload.answers).await?;
    tag_categories(&mut tx, id, &payload.category_ids).await?;

    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(fetch_question(&pool, id).await?)))
}

/// Updates a question. Supplied `answers` and `category_ids` replace the current sets.
pub async fn update_question(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let current = fetch_question(&pool, id).await?;
    let item_id = payload.item_id.unwrap_or(current.question.item_id);
    let item = fetch_item(&pool, item_id).await?;

    if item.is_choice() {
        match &payload.answers {
            Some(answers) => check_choice_answers(answers),
            None => check_correct_flags(current.answers.iter().map(|a| a.is_correct_answer)),
        }
        .map_err(|m| AppError::BadRequest(m.to_string()))?;
    }

    let mut tx = pool.begin().await?;

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("UPDATE questions SET updated_at = NOW(), item_id = ");
    builder.push_bind(item.id);

    if let Some(question_type) = payload.question_type {
        builder.push(", type = ").push_bind(question_type);
    }
    if let Some(question) = payload.question {
        builder.push(", question = ").push_bind(clean_html(&question));
    }
    if let Some(is_random) = payload.is_random {
        builder.push(", is_random = ").push_bind(is_random);
    }
    if let Some(score) = payload.score {
        builder.push(", score = ").push_bind(score);
    }
    if let Some(order) = payload.order {
        builder.push(r#", "order" = "#).push_bind(order);
    }
    builder.push(" WHERE id = ").push_bind(id);

    builder.build().execute(&mut *tx).await.map_err(|e| {
        tracing::error!("Failed to update question: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    if let Some(answers) = &payload.answers {
        sqlx::query("DELETE FROM answers WHERE question_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_answers(&mut tx, id, answers).await?;
    }

    if let Some(category_ids) = &payload.category_ids {
        sqlx::query("DELETE FROM question_categories WHERE question_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tag_categories(&mut tx, id, category_ids).await?;
    }

    tx.commit().await?;

    Ok(Json(fetch_question(&pool, id).await?))
}

pub async fn delete_question(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM questions WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete question: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Question not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_question(pool: &PgPool, id: i64) -> Result<QuestionWithAnswers, AppError> {
    let question = sqlx::query_as::<_, Question>(&format!(
        "SELECT {QUESTION_COLUMNS} FROM questions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;

    attach_answers(pool, vec![question])
        .await?
        .pop()
        .ok_or_else(|| AppError::NotFound("Question not found".to_string()))
}

async fn insert_answers(
    tx: &mut Transaction<'_, Postgres>,
    question_id: i64,
    answers: &[AnswerRequest],
) -> Result<(), AppError> {
    for answer in answers {
        sqlx::query(
            "INSERT INTO answers (question_id, answer, is_correct_answer) VALUES ($1, $2, $3)",
        )
        .bind(question_id)
        .bind(clean_html(&answer.answer))
        .bind(answer.is_correct_answer)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Links the question to the given categories. Unknown or deleted categories are skipped.
async fn tag_categories(
    tx: &mut Transaction<'_, Postgres>,
    question_id: i64,
    category_ids: &[i64],
) -> Result<(), AppError> {
    if category_ids.is_empty() {
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO question_categories (question_id, category_id) \
         SELECT $1, id FROM categories WHERE id = ANY($2) AND deleted_at IS NULL \
         ON CONFLICT DO NOTHING",
    )
    .bind(question_id)
    .bind(category_ids)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

// src/handlers/items.rs

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::{PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    error::AppError,
    models::question::{
        Answer, CreateItemRequest, ITEM_COLUMNS, Item, ItemSummary, ItemWithQuestions,
        QUESTION_COLUMNS, Question, QuestionWithAnswers, UpdateItemRequest,
    },
    utils::{
        html::{clean_html, clean_optional},
        pagination::{Paginated, PaginationParams},
    },
};

/// Loads questions (by `order`, then id) with their answers (by id) and category ids.
pub(crate) async fn load_questions(
    pool: &PgPool,
    item_ids: &[i64],
) -> Result<Vec<QuestionWithAnswers>, AppError> {
    let questions = sqlx::query_as::<_, Question>(&format!(
        r#"SELECT {QUESTION_COLUMNS} FROM questions WHERE item_id = ANY($1) ORDER BY "order", id"#
    ))
    .bind(item_ids)
    .fetch_all(pool)
    .await?;

    attach_answers(pool, questions).await
}

pub(crate) async fn attach_answers(
    pool: &PgPool,
    questions: Vec<Question>,
) -> Result<Vec<QuestionWithAnswers>, AppError> {
    let ids: Vec<i64> = questions.iter().map(|q| q.id).collect();

    let answers = sqlx::query_as::<_, Answer>(
        "SELECT id, question_id, answer, is_correct_answer FROM answers \
         WHERE question_id = ANY($1) ORDER BY id",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let tags: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT question_id, category_id FROM question_categories \
         WHERE question_id = ANY($1) ORDER BY category_id",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let mut answers_by_question: HashMap<i64, Vec<Answer>> = HashMap::new();
    for answer in answers {
        answers_by_question
            .entry(answer.question_id)
            .or_default()
            .push(answer);
    }

    let mut tags_by_question: HashMap<i64, Vec<i64>> = HashMap::new();
    for (question_id, category_id) in tags {
        tags_by_question.entry(question_id).or_default().push(category_id);
    }

    Ok(questions
        .into_iter()
        .map(|question| QuestionWithAnswers {
            answers: answers_by_question.remove(&question.id).unwrap_or_default(),
            category_ids: tags_by_question.remove(&question.id).unwrap_or_default(),
            question,
        })
        .collect())
}

/// Nests questions under the given items, keeping the items' order.
pub(crate) async fn load_items(
    pool: &PgPool,
    items: Vec<Item>,
) -> Result<Vec<ItemWithQuestions>, AppError> {
    let ids: Vec<i64> = items.iter().map(|i| i.id).collect();

    let mut by_item: HashMap<i64, Vec<QuestionWithAnswers>> = HashMap::new();
    for question in load_questions(pool, &ids).await? {
        by_item
            .entry(question.question.item_id)
            .or_default()
            .push(question);
    }

    Ok(items
        .into_iter()
        .map(|item| ItemWithQuestions {
            questions: by_item.remove(&item.id).unwrap_or_default(),
            item,
        })
        .collect())
}

pub(crate) async fn fetch_item(pool: &PgPool, id: i64) -> Result<Item, AppError> {
    sqlx::query_as::<_, Item>(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Item not found".to_string()))
}

/// Lists items, newest first, with their question counts.
pub async fn list_items(
    State(pool): State<PgPool>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, AppError> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
        .fetch_one(&pool)
        .await?;

    let items = sqlx::query_as::<_, ItemSummary>(
        r#"
        SELECT i.id, i.title, i.content, i.type, i.is_vignette, i.is_random, i.score,
               i.created_at, i.updated_at,
               (SELECT COUNT(*) FROM questions q WHERE q.item_id = i.id) AS question_count
        FROM items i
        ORDER BY i.created_at DESC, i.id DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list items: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(Paginated {
        items,
        pagination: params.meta(total),
    }))
}

/// Returns an item with its questions and answer options.
pub async fn get_item(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let item = fetch_item(&pool, id).await?;
    let mut loaded = load_items(&pool, vec![item]).await?;

    loaded
        .pop()
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Item not found".to_string()))
}

pub async fn create_item(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateItemRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let item = sqlx::query_as::<_, Item>(&format!(
        "INSERT INTO items (title, content, type, is_vignette, is_random, score) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {ITEM_COLUMNS}"
    ))
    .bind(payload.title.trim())
    .bind(clean_optional(payload.content.as_deref()))
    .bind(payload.item_type.as_deref().unwrap_or("multiple-choice"))
    .bind(payload.is_vignette.unwrap_or(false))
    .bind(payload.is_random.unwrap_or(false))
    .bind(payload.score.unwrap_or(0))
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create item: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn update_item(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateItemRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("UPDATE items SET updated_at = NOW()");

    if let Some(title) = payload.title {
        builder.push(", title = ").push_bind(title.trim().to_string());
    }
    if let Some(content) = payload.content {
        builder.push(", content = ").push_bind(clean_html(&content));
    }
    if let Some(item_type) = payload.item_type {
        builder.push(", type = ").push_bind(item_type);
    }
    if let Some(is_vignette) = payload.is_vignette {
        builder.push(", is_vignette = ").push_bind(is_vignette);
    }
    if let Some(is_random) = payload.is_random {
        builder.push(", is_random = ").push_bind(is_random);
    }
    if let Some(score) = payload.score {
        builder.push(", score = ").push_bind(score);
    }

    builder.push(" WHERE id = ").push_bind(id);

    let result = builder.build().execute(&pool).await.map_err(|e| {
        tracing::error!("Failed to update item: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Item not found".to_string()));
    }

    Ok(Json(fetch_item(&pool, id).await?))
}

/// Deletes an item together with its questions and answers.
pub async fn delete_item(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM items WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete item: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Item not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

// src/handlers/clients.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder, types::Json as SqlJson};
use validator::Validate;

use crate::{
    error::{AppError, conflict_or_internal},
    models::client::{CLIENT_COLUMNS, Client, CreateClientRequest, UpdateClientRequest},
    utils::codes::slugify,
};

const DUPLICATE_CLIENT: &str = "A client with this slug or subdomain already exists";

/// Public view of a tenant, used by login pages to pick a client.
#[derive(Debug, sqlx::FromRow, Serialize)]
pub struct PublicClient {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub subdomain: Option<String>,
}

/// Lists active clients. No authentication required.
pub async fn list_public_clients(
    State(pool): State<PgPool>,
) -> Result<impl IntoResponse, AppError> {
    let clients = sqlx::query_as::<_, PublicClient>(
        "SELECT id, name, slug, subdomain FROM clients \
         WHERE is_active = TRUE AND deleted_at IS NULL ORDER BY name",
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list public clients: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(clients))
}

/// Lists all non-deleted clients.
/// Admin only.
pub async fn list_clients(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let clients = sqlx::query_as::<_, Client>(&format!(
        "SELECT {CLIENT_COLUMNS} FROM clients WHERE deleted_at IS NULL ORDER BY name"
    ))
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list clients: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(clients))
}

pub async fn get_client(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(fetch_client(&pool, id).await?))
}

/// Creates a client. The slug is derived from the name when not supplied.
/// Admin only.
pub async fn create_client(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateClientRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let slug = payload.slug.clone().unwrap_or_else(|| slugify(&payload.name));
    if slug.is_empty() {
        return Err(AppError::BadRequest(
            "Cannot derive a slug from this name".to_string(),
        ));
    }

    let client = sqlx::query_as::<_, Client>(&format!(
        "INSERT INTO clients (name, slug, domain, subdomain, settings, is_active) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {CLIENT_COLUMNS}"
    ))
    .bind(&payload.name)
    .bind(&slug)
    .bind(payload.domain.as_deref().map(str::to_lowercase))
    .bind(&payload.subdomain)
    .bind(SqlJson(
        payload
            .settings
            .clone()
            .unwrap_or_else(|| serde_json::json!({})),
    ))
    .bind(payload.is_active.unwrap_or(true))
    .fetch_one(&pool)
    .await
    .map_err(|e| conflict_or_internal(e, DUPLICATE_CLIENT))?;

    tracing::info!("Client '{}' created", client.slug);

    Ok((StatusCode::CREATED, Json(client)))
}

/// Updates a client. Absent fields are left unchanged.
/// Admin only.
pub async fn update_client(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateClientRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("UPDATE clients SET updated_at = NOW()");

    if let Some(name) = payload.name {
        builder.push(", name = ").push_bind(name);
    }
    if let Some(slug) = payload.slug {
        builder.push(", slug = ").push_bind(slug);
    }
    if let Some(domain) = payload.domain {
        builder.push(", domain = ").push_bind(domain.to_lowercase());
    }
    if let Some(subdomain) = payload.subdomain {
        builder.push(", subdomain = ").push_bind(subdomain);
    }
    if let Some(settings) = payload.settings {
        builder.push(", settings = ").push_bind(SqlJson(settings));
    }
    if let Some(is_active) = payload.is_active {
        builder.push(", is_active = ").push_bind(is_active);
    }

    builder.push(" WHERE deleted_at IS NULL AND id = ");
    builder.push_bind(id);

    let result = builder
        .build()
        .execute(&pool)
        .await
        .map_err(|e| conflict_or_internal(e, DUPLICATE_CLIENT))?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Client not found".to_string()));
    }

    Ok(Json(fetch_client(&pool, id).await?))
}

/// Soft-deletes a client.
/// Admin only.
pub async fn delete_client(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query(
        "UPDATE clients SET deleted_at = NOW(), is_active = FALSE \
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to delete client: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Client not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_client(pool: &PgPool, id: i64) -> Result<Client, AppError> {
    sqlx::query_as::<_, Client>(&format!(
        "SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Client not found".to_string()))
}

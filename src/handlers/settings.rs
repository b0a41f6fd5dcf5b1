// src/handlers/settings.rs

use axum::{Json, extract::State, response::IntoResponse};
use sqlx::PgPool;

use crate::{
    error::AppError,
    models::setting::{SettingRow, SiteSettings, UpdateSettingsRequest},
};

/// Reads all stored settings and applies the defaults.
pub(crate) async fn load_site_settings(pool: &PgPool) -> Result<SiteSettings, AppError> {
    let rows = sqlx::query_as::<_, SettingRow>("SELECT key, value, type FROM settings")
        .fetch_all(pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load settings: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    Ok(SiteSettings::from_rows(&rows))
}

pub async fn get_settings(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(load_site_settings(&pool).await?))
}

/// Upserts each supplied setting and returns the full set.
pub async fn update_settings(
    State(pool): State<PgPool>,
    Json(payload): Json<UpdateSettingsRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate_ranges()
        .map_err(|m| AppError::BadRequest(m.to_string()))?;

    let mut tx = pool.begin().await?;

    for (key, value, value_type) in payload.to_rows() {
        sqlx::query(
            "INSERT INTO settings (key, value, type) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, type = EXCLUDED.type",
        )
        .bind(key)
        .bind(value)
        .bind(value_type)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!("Site settings updated");

    Ok(Json(load_site_settings(&pool).await?))
}

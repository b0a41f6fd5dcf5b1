// src/models/client.rs

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use url::Url;
use validator::Validate;

/// Represents the 'clients' table: one row per tenant organisation.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Client {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub domain: Option<String>,
    pub subdomain: Option<String>,
    /// Free-form tenant settings stored as JSONB.
    pub settings: Json<serde_json::Value>,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub const CLIENT_COLUMNS: &str =
    "id, name, slug, domain, subdomain, settings, is_active, created_at, updated_at";

/// DTO for creating a client. The slug is derived from the name when absent.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateClientRequest {
    #[validate(length(min = 1, max = 150))]
    pub name: String,
    #[validate(length(min = 1, max = 150), custom(function = validate_slug))]
    pub slug: Option<String>,
    #[validate(length(max = 255), custom(function = validate_domain))]
    pub domain: Option<String>,
    #[validate(length(min = 1, max = 100), custom(function = validate_slug))]
    pub subdomain: Option<String>,
    pub settings: Option<serde_json::Value>,
    pub is_active: Option<bool>,
}

/// DTO for updating a client. Absent fields are left unchanged.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateClientRequest {
    #[validate(length(min = 1, max = 150))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 150), custom(function = validate_slug))]
    pub slug: Option<String>,
    #[validate(length(max = 255), custom(function = validate_domain))]
    pub domain: Option<String>,
    #[validate(length(min = 1, max = 100), custom(function = validate_slug))]
    pub subdomain: Option<String>,
    pub settings: Option<serde_json::Value>,
    pub is_active: Option<bool>,
}

/// Slugs and subdomains: lowercase ASCII letters, digits and inner dashes.
fn validate_slug(slug: &str) -> Result<(), validator::ValidationError> {
    let valid = !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if !valid {
        return Err(validator::ValidationError::new("invalid_slug"));
    }
    Ok(())
}

/// A bare host name such as `siloam.co.id` (no scheme, port or path).
fn validate_domain(domain: &str) -> Result<(), validator::ValidationError> {
    let parsed = Url::parse(&format!("https://{}", domain))
        .map_err(|_| validator::ValidationError::new("invalid_domain"))?;

    let bare = parsed.host_str() == Some(domain.to_lowercase().as_str())
        && parsed.port().is_none()
        && parsed.path() == "/"
        && domain.contains('.');

    if !bare {
        return Err(validator::ValidationError::new("invalid_domain"));
    }
    Ok(())
}

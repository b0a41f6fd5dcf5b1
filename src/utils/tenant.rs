// src/utils/tenant.rs

//! Tenant (client) resolution from request headers.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use serde::Serialize;
use sqlx::PgPool;

use crate::{error::AppError, utils::jwt::Claims};

pub const CLIENT_ID_HEADER: &str = "x-client-id";
pub const CLIENT_SLUG_HEADER: &str = "x-client-slug";

/// What the request says about its tenant, before any lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientHint {
    Id(i64),
    Slug(String),
    Subdomain(String),
}

/// First label of a host with at least three labels, ignoring any port.
///
/// `acme.medxamion.com:8080` -> `acme`; `localhost:3000` -> none.
pub fn subdomain_of(host: &str) -> Option<String> {
    let host = host.split(':').next().unwrap_or(host);
    let labels: Vec<&str> = host.split('.').collect();

    if labels.len() < 3 || labels.iter().all(|l| l.chars().all(|c| c.is_ascii_digit())) {
        return None;
    }

    labels
        .first()
        .filter(|l| !l.is_empty() && *l != &"www")
        .map(|l| l.to_lowercase())
}

/// Picks the tenant hint: `X-Client-Id`, then `X-Client-Slug`, then the host subdomain.
pub fn client_hint(headers: &HeaderMap) -> Option<ClientHint> {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(id) = text(CLIENT_ID_HEADER).and_then(|v| v.parse::<i64>().ok()) {
        return Some(ClientHint::Id(id));
    }

    if let Some(slug) = text(CLIENT_SLUG_HEADER) {
        return Some(ClientHint::Slug(slug.to_lowercase()));
    }

    text("host")
        .and_then(subdomain_of)
        .map(ClientHint::Subdomain)
}

/// The active tenant a request is scoped to.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ClientContext {
    pub client_id: i64,
    pub client_slug: String,
    pub subdomain: Option<String>,
}

impl ClientContext {
    /// Tokens issued for one tenant cannot act on another.
    pub fn authorize(&self, claims: &Claims) -> Result<(), AppError> {
        match claims.client_id {
            Some(id) if id != self.client_id => Err(AppError::Forbidden(
                "Token is not valid for this client".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub async fn resolve(pool: &PgPool, hint: &ClientHint) -> Result<Option<Self>, AppError> {
        const BASE: &str = "SELECT id AS client_id, slug AS client_slug, subdomain FROM clients \
                            WHERE is_active = TRUE AND deleted_at IS NULL AND ";

        let found = match hint {
            ClientHint::Id(id) => {
                sqlx::query_as::<_, ClientContext>(&format!("{BASE}id = $1"))
                    .bind(*id)
                    .fetch_optional(pool)
                    .await
            }
            ClientHint::Slug(slug) => {
                sqlx::query_as::<_, ClientContext>(&format!("{BASE}slug = $1"))
                    .bind(slug)
                    .fetch_optional(pool)
                    .await
            }
            ClientHint::Subdomain(sub) => {
                sqlx::query_as::<_, ClientContext>(&format!("{BASE}(subdomain = $1 OR slug = $1)"))
                    .bind(sub)
                    .fetch_optional(pool)
                    .await
            }
        };

        found.map_err(|e| {
            tracing::error!("Failed to resolve client: {:?}", e);
            AppError::from(e)
        })
    }
}

impl<S> FromRequestParts<S> for ClientContext
where
    PgPool: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let missing = || AppError::BadRequest("Client context required".to_string());

        let hint = client_hint(&parts.headers).ok_or_else(missing)?;
        let pool = PgPool::from_ref(state);

        ClientContext::resolve(&pool, &hint).await?.ok_or_else(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::jwt::UserType;
    use axum::http::{HeaderValue, header};
    use uuid::Uuid;

    fn claims(client_id: Option<i64>) -> Claims {
        Claims {
            sub: "1".into(),
            user_type: UserType::Internal,
            sid: Uuid::new_v4(),
            client_id,
            exp: 0,
        }
    }

    #[test]
    fn scoped_token_must_match_client() {
        let ctx = ClientContext {
            client_id: 5,
            client_slug: "rscm".into(),
            subdomain: None,
        };

        assert!(ctx.authorize(&claims(None)).is_ok());
        assert!(ctx.authorize(&claims(Some(5))).is_ok());
        assert!(matches!(
            ctx.authorize(&claims(Some(6))),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn subdomain_requires_three_labels() {
        assert_eq!(subdomain_of("siloam.medxamion.com"), Some("siloam".into()));
        assert_eq!(subdomain_of("Siloam.medxamion.com:8443"), Some("siloam".into()));
        assert_eq!(subdomain_of("localhost:3000"), None);
        assert_eq!(subdomain_of("medxamion.com"), None);
        assert_eq!(subdomain_of("127.0.0.1:3000"), None);
        assert_eq!(subdomain_of("www.medxamion.com"), None);
    }

    #[test]
    fn id_header_wins_over_slug_and_host() {
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static("12"));
        headers.insert(CLIENT_SLUG_HEADER, HeaderValue::from_static("rscm"));
        headers.insert(header::HOST, HeaderValue::from_static("siloam.medxamion.com"));

        assert_eq!(client_hint(&headers), Some(ClientHint::Id(12)));
    }

    #[test]
    fn slug_then_subdomain() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("siloam.medxamion.com"));
        assert_eq!(
            client_hint(&headers),
            Some(ClientHint::Subdomain("siloam".into()))
        );

        headers.insert(CLIENT_SLUG_HEADER, HeaderValue::from_static("RSCM"));
        assert_eq!(client_hint(&headers), Some(ClientHint::Slug("rscm".into())));
    }

    #[test]
    fn non_numeric_id_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static("abc"));
        assert_eq!(client_hint(&headers), None);
    }
}

// src/models/user.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::utils::jwt::UserType;

/// Represents the 'users' table: internal staff and administrators.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub client_id: Option<i64>,
    pub name: String,
    pub username: String,
    pub email: String,

    /// Argon2 password hash.
    /// Skipped during serialization to prevent leaking sensitive data.
    #[serde(skip)]
    pub password: String,

    #[serde(skip)]
    pub active_session_id: Option<Uuid>,

    pub last_login: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub const USER_COLUMNS: &str =
    "id, client_id, name, username, email, password, active_session_id, last_login, created_at";

/// Represents the 'takers' table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Taker {
    pub id: i64,
    pub client_id: Option<i64>,
    /// Registration number, e.g. `T20250001`.
    pub reg: String,
    pub name: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    /// 'active' or 'inactive'. Inactive takers cannot log in.
    pub status: String,

    #[serde(skip)]
    pub password: String,

    #[serde(skip)]
    pub active_session_id: Option<Uuid>,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub const TAKER_COLUMNS: &str = "id, client_id, reg, name, username, email, phone, address, status, \
                                 password, active_session_id, created_at, updated_at";

/// DTO for `/api/auth/login` and `/api/auth/login-client`.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    /// Username, email, or (for takers) registration number.
    #[validate(length(min = 1, max = 255))]
    pub username: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
    /// Defaults to `taker`.
    #[serde(default)]
    pub user_type: Option<UserType>,
}

/// Profile returned by login and `/me`.
#[derive(Debug, Serialize)]
pub struct Profile {
    pub id: i64,
    pub name: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub user_type: UserType,
    pub client_id: Option<i64>,
    /// Taker registration number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reg: Option<String>,
}

impl From<&User> for Profile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            username: Some(user.username.clone()),
            email: Some(user.email.clone()),
            user_type: UserType::Internal,
            client_id: user.client_id,
            reg: None,
        }
    }
}

impl From<&Taker> for Profile {
    fn from(taker: &Taker) -> Self {
        Self {
            id: taker.id,
            name: taker.name.clone(),
            username: taker.username.clone().or_else(|| Some(taker.reg.clone())),
            email: taker.email.clone(),
            user_type: UserType::Taker,
            client_id: taker.client_id,
            reg: Some(taker.reg.clone()),
        }
    }
}

/// DTO for an admin creating a taker.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTakerRequest {
    /// Generated as `T<year><seq>` when absent.
    #[validate(length(min = 1, max = 50))]
    pub reg: Option<String>,
    #[validate(length(min = 1, max = 150))]
    pub name: String,
    #[validate(length(min = 3, max = 100))]
    pub username: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    #[validate(length(max = 1000))]
    pub address: Option<String>,
    #[validate(custom(function = validate_taker_status))]
    pub status: Option<String>,
    /// Defaults to the registration number when absent.
    #[validate(length(min = 4, max = 128))]
    pub password: Option<String>,
    pub client_id: Option<i64>,
}

/// DTO for updating a taker. Absent fields are left unchanged.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTakerRequest {
    #[validate(length(min = 1, max = 50))]
    pub reg: Option<String>,
    #[validate(length(min = 1, max = 150))]
    pub name: Option<String>,
    #[validate(length(min = 3, max = 100))]
    pub username: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    #[validate(length(max = 1000))]
    pub address: Option<String>,
    #[validate(custom(function = validate_taker_status))]
    pub status: Option<String>,
    #[validate(length(min = 4, max = 128))]
    pub password: Option<String>,
}

fn validate_taker_status(status: &str) -> Result<(), validator::ValidationError> {
    if status != "active" && status != "inactive" {
        return Err(validator::ValidationError::new("invalid_taker_status"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taker_status_is_restricted() {
        let req = CreateTakerRequest {
            reg: None,
            name: "Siti".into(),
            username: None,
            email: None,
            phone: None,
            address: None,
            status: Some("banned".into()),
            password: None,
            client_id: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn login_defaults_user_type_to_none() {
        let req: LoginRequest =
            serde_json::from_str(r#"{"username":"T20250001","password":"x"}"#).unwrap();
        assert!(req.user_type.is_none());
    }
}

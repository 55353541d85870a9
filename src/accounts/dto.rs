use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::store::Account;

/// Request body for registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub age: Option<i32>,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// OAuth2 password form, as posted by interactive API docs. The `username`
/// field carries the email.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// Partial update: omitted fields are left untouched.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateAccountRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub age: Option<i32>,
    pub password: Option<String>,
}

/// Response returned after login.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub token_type: &'static str,
    pub account: AccountResponse,
}

/// Public part of an account. The password hash never appears here.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub age: Option<i32>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            name: account.name,
            email: account.email,
            age: account.age,
            is_active: account.is_active,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_users: i64,
    pub active_users: i64,
    pub inactive_users: i64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    pub detail: Option<String>,
}

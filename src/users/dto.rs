use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;

use crate::users::repo_types::User;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn validate_username(username: &str) -> Result<(), String> {
    let len = username.chars().count();
    if !(3..=50).contains(&len) {
        return Err("Username must be 3-50 characters".into());
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), String> {
    let len = password.chars().count();
    if !(6..=100).contains(&len) {
        return Err("Password must be 6-100 characters".into());
    }
    Ok(())
}

fn validate_full_name(full_name: &str) -> Result<(), String> {
    if full_name.chars().count() > 100 {
        return Err("Full name must be at most 100 characters".into());
    }
    Ok(())
}

/// Request body for creating a user.
#[derive(Debug, Deserialize)]
pub struct UserCreate {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_admin: bool,
}

fn default_true() -> bool {
    true
}

impl UserCreate {
    pub fn validate(&self) -> Result<(), String> {
        validate_username(&self.username)?;
        if !is_valid_email(&self.email) {
            return Err("Invalid email".into());
        }
        validate_password(&self.password)?;
        if let Some(full_name) = &self.full_name {
            validate_full_name(full_name)?;
        }
        Ok(())
    }
}

/// Deserializes a field that was present in the payload, keeping the outer
/// `Option` as the presence marker. With `#[serde(default)]` an absent field
/// stays `None` while an explicit `null` becomes `Some(None)`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Request body for a partial update. Absent fields are left untouched;
/// for the nullable fields an explicit `null` clears the stored value.
#[derive(Debug, Default, Deserialize)]
pub struct UserUpdate {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub full_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub bio: Option<Option<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub is_admin: Option<bool>,
    #[serde(default)]
    pub password: Option<String>,
}

impl UserUpdate {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(username) = &self.username {
            validate_username(username)?;
        }
        if let Some(email) = &self.email {
            if !is_valid_email(email) {
                return Err("Invalid email".into());
            }
        }
        if let Some(Some(full_name)) = &self.full_name {
            validate_full_name(full_name)?;
        }
        if let Some(password) = &self.password {
            validate_password(password)?;
        }
        Ok(())
    }
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Public part of the user returned to the client. Never carries the
/// password hash.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub is_active: bool,
    pub is_admin: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            bio: user.bio,
            is_active: user.is_active,
            is_admin: user.is_admin,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Query parameters for the list endpoint.
#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

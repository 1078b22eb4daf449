use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub bio: Option<String>,
    #[serde(skip_serializing)]
    pub hashed_password: String, // argon2 hash, not exposed in JSON
    pub is_active: bool,
    pub is_admin: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Fully-prepared insert payload. The password is already hashed by the
/// time this is built.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub hashed_password: String,
    pub is_active: bool,
    pub is_admin: bool,
}

/// Field-level change set for a partial update. `None` leaves the column
/// untouched; for the nullable columns the inner `Option` distinguishes
/// "set to NULL" from "set to a value".
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<Option<String>>,
    pub bio: Option<Option<String>>,
    pub hashed_password: Option<String>,
    pub is_active: Option<bool>,
    pub is_admin: Option<bool>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.full_name.is_none()
            && self.bio.is_none()
            && self.hashed_password.is_none()
            && self.is_active.is_none()
            && self.is_admin.is_none()
    }
}

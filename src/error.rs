use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Which unique column a conflicting write collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateField {
    Username,
    Email,
}

impl std::fmt::Display for DuplicateField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DuplicateField::Username => f.write_str("Username"),
            DuplicateField::Email => f.write_str("Email"),
        }
    }
}

/// Wording of a uniqueness conflict: creation says "already registered",
/// updates say "already taken".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKind {
    Registered,
    Taken,
}

impl std::fmt::Display for DuplicateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DuplicateKind::Registered => f.write_str("registered"),
            DuplicateKind::Taken => f.write_str("taken"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} already {1}")]
    Duplicate(DuplicateField, DuplicateKind),
    #[error("User not found")]
    NotFound,
    #[error("{0}")]
    InvalidInput(String),
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("User account is disabled")]
    AccountDisabled,
    #[error("storage failure")]
    Storage(#[from] sqlx::Error),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Duplicate(_, _) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::AccountDisabled => StatusCode::BAD_REQUEST,
            ApiError::Storage(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal detail stays in the logs, never in the body.
        let detail = match &self {
            ApiError::Storage(e) => {
                error!(error = %e, "storage failure");
                "Internal server error".to_string()
            }
            ApiError::Internal(e) => {
                error!(error = %e, "internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::Duplicate(DuplicateField::Username, DuplicateKind::Registered).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::InvalidInput("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::InvalidCredentials.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::AccountDisabled.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Storage(sqlx::Error::PoolTimedOut).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn duplicate_messages_name_the_field_and_path() {
        assert_eq!(
            ApiError::Duplicate(DuplicateField::Username, DuplicateKind::Registered).to_string(),
            "Username already registered"
        );
        assert_eq!(
            ApiError::Duplicate(DuplicateField::Email, DuplicateKind::Registered).to_string(),
            "Email already registered"
        );
        assert_eq!(
            ApiError::Duplicate(DuplicateField::Username, DuplicateKind::Taken).to_string(),
            "Username already taken"
        );
        assert_eq!(
            ApiError::Duplicate(DuplicateField::Email, DuplicateKind::Taken).to_string(),
            "Email already taken"
        );
    }

    #[test]
    fn storage_errors_hide_detail_from_the_body() {
        let resp = ApiError::Storage(sqlx::Error::PoolTimedOut).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

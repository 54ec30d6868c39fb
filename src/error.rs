use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::profiles::repo::Profile;
use crate::response::{ApiResponse, FieldError};

/// Every core operation resolves to a success value or one of these; raw
/// storage errors never cross a handler boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation failed")]
    ValidationFailed(Vec<FieldError>),
    #[error("Email already registered")]
    DuplicateEmail,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid or malformed access token")]
    TokenInvalid,
    #[error("Access token has expired")]
    TokenExpired,
    #[error("Invalid verification token")]
    VerificationTokenNotFound,
    #[error("Verification token has expired")]
    VerificationTokenExpired,
    #[error("Invalid refresh token")]
    RefreshTokenInvalid,
    #[error("Refresh token has expired")]
    RefreshTokenExpired,
    #[error("Profile already exists")]
    ProfileAlreadyExists(Box<Profile>),
    #[error("Profile not found")]
    ProfileNotFound,
    #[error("No fields to update")]
    NoFieldsToUpdate,
    #[error("User not found")]
    UserNotFound,
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::ValidationFailed(_)
            | ApiError::VerificationTokenNotFound
            | ApiError::VerificationTokenExpired
            | ApiError::NoFieldsToUpdate => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredentials
            | ApiError::TokenInvalid
            | ApiError::TokenExpired
            | ApiError::RefreshTokenInvalid
            | ApiError::RefreshTokenExpired => StatusCode::UNAUTHORIZED,
            ApiError::DuplicateEmail | ApiError::ProfileAlreadyExists(_) => StatusCode::CONFLICT,
            ApiError::ProfileNotFound | ApiError::UserNotFound => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = ApiResponse::failure(self.to_string());
        match self {
            ApiError::ValidationFailed(errors) => body.errors = Some(errors),
            // 409 carries the winning row so the caller can switch to an update.
            ApiError::ProfileAlreadyExists(existing) => {
                body.data = serde_json::to_value(*existing).ok();
            }
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

/// Postgres unique-violation (SQLSTATE 23505); the constraint outcome every
/// check-then-insert path must handle explicitly.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "database error");
        ApiError::Internal
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "internal error");
        ApiError::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_contract() {
        assert_eq!(
            ApiError::ValidationFailed(vec![]).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::DuplicateEmail.status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::InvalidCredentials.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::RefreshTokenExpired.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::VerificationTokenNotFound.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::ProfileNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn validation_failure_exposes_field_errors() {
        let err = ApiError::ValidationFailed(vec![FieldError::new("email", "Invalid email")]);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_error_hides_detail() {
        let err: ApiError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, ApiError::Internal));
        assert_eq!(err.to_string(), "Internal server error");
    }
}

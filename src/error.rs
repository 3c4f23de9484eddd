use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::auth::jwt::TokenError;
use crate::users::repo::RepoError;

/// Every failure an HTTP handler can surface. Rendered as `{"message": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("Email already in use")]
    EmailInUse,
    #[error("User not found")]
    UserNotFound,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("No file uploaded")]
    NoFileProvided,
    #[error("Upload failed")]
    UploadFailed(#[source] anyhow::Error),
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::EmailInUse | AppError::NoFileProvided => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized(_) | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::UserNotFound => StatusCode::NOT_FOUND,
            AppError::UploadFailed(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Internal(e) => error!(error = %format!("{e:#}"), "internal error"),
            AppError::UploadFailed(e) => error!(error = %format!("{e:#}"), "avatar upload failed"),
            _ => {}
        }
        let body = Json(json!({ "message": self.to_string() }));
        (self.status(), body).into_response()
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        AppError::Unauthorized(e.to_string())
    }
}

impl From<RepoError> for AppError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::EmailTaken => AppError::EmailInUse,
            RepoError::Other(e) => AppError::Internal(e),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

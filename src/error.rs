use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

/// Every failure the store clients, the identity provider and the AI client
/// can surface. Nothing is recovered locally; handlers hand these straight to
/// actix-web, which renders them through `ResponseError`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Permission(String),

    #[error("Already a member of this group")]
    AlreadyMember,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Conflict(String),

    #[error("remote write failed: {0}")]
    RemoteWrite(String),

    #[error("remote query failed: {0}")]
    RemoteQuery(String),

    #[error("text generation failed: {0}")]
    Generation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Permission(_) => StatusCode::FORBIDDEN,
            AppError::AlreadyMember | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::RemoteWrite(_) | AppError::RemoteQuery(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Generation(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).body(self.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

use axum::{
    extract::rejection::JsonRejection,
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use thiserror::Error;

/// Failures reported by a record store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("referenced record missing: {0}")]
    ForeignKeyViolation(String),

    #[error("store unavailable: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            match db.kind() {
                sqlx::error::ErrorKind::UniqueViolation => {
                    return StoreError::UniqueViolation(db.message().to_string())
                }
                sqlx::error::ErrorKind::ForeignKeyViolation => {
                    return StoreError::ForeignKeyViolation(db.message().to_string())
                }
                _ => {}
            }
        }
        StoreError::Backend(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("assessment already submitted by this user")]
    DuplicateSubmission,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl AppError {
    pub fn not_found<T: Into<String>>(what: T) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        AppError::InvalidInput(msg.into())
    }
}

/// Constraint violations outside the submission path are plain conflicts.
impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UniqueViolation(msg) | StoreError::ForeignKeyViolation(msg) => {
                AppError::Conflict(msg)
            }
            StoreError::Backend(msg) => AppError::Unavailable(msg),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidInput(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::DuplicateSubmission | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unavailable(_) => {
                tracing::error!(error = %self, "store failure");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

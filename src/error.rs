use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Storage-level failures (SQL Server or the in-memory store).
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQL Server error: {0}")]
    Sql(#[from] tiberius::error::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("cannot decode column {column}: {reason}")]
    Decode { column: String, reason: String },

    #[error("constraint violation: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl DbError {
    pub fn decode(column: impl Into<String>, reason: impl Into<String>) -> Self {
        DbError::Decode {
            column: column.into(),
            reason: reason.into(),
        }
    }

    /// Unique and primary key violations (2627 / 2601) become `Conflict`.
    pub fn from_sql(err: tiberius::error::Error) -> Self {
        match &err {
            tiberius::error::Error::Server(token) if matches!(token.code(), 2627 | 2601) => {
                DbError::Conflict(token.message().to_string())
            }
            _ => DbError::Sql(err),
        }
    }
}

impl<E: std::error::Error + 'static> From<bb8::RunError<E>> for DbError {
    fn from(err: bb8::RunError<E>) -> Self {
        DbError::Pool(err.to_string())
    }
}

/// Errors surfaced to HTTP callers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("authentication required")]
    Unauthenticated,

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] DbError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(DbError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        let body = ErrorBody {
            success: false,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::PermissionDenied("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::Database(DbError::Conflict("dup".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Database(DbError::Unavailable("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_pool_errors_become_pool_variant() {
        let timed_out: DbError = bb8::RunError::<std::io::Error>::TimedOut.into();
        assert!(matches!(timed_out, DbError::Pool(_)));

        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: DbError = bb8::RunError::User(refused).into();
        assert!(matches!(err, DbError::Pool(ref message) if message.contains("refused")));
    }
}

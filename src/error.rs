use crate::domain::CommissionStatus;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;
const SQLITE_CONSTRAINT: i64 = 19;
const SQLITE_CONSTRAINT_FOREIGNKEY: i64 = 787;

/// Failure of a commission-engine operation.
///
/// Every variant names the entity it was working on and the operation attempted, so the
/// caller can act on it without reparsing the message.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid reference to {entity} during {operation}: {detail}")]
    InvalidReference {
        entity: String,
        operation: &'static str,
        detail: String,
    },
    #[error("integrity violation on {entity} during {operation}: {detail}")]
    IntegrityViolation {
        entity: String,
        operation: &'static str,
        detail: String,
    },
    #[error("{operation} on {entity} timed out after {after_ms}ms")]
    Timeout {
        entity: String,
        operation: &'static str,
        after_ms: u64,
    },
    #[error("concurrent update of {entity} during {operation}: {detail}")]
    ConcurrencyConflict {
        entity: String,
        operation: &'static str,
        detail: String,
    },
    #[error("{entity} is {status:?} and cannot be changed by {operation}")]
    TerminalStateViolation {
        entity: String,
        operation: &'static str,
        status: CommissionStatus,
    },
    #[error("invalid input for {entity} during {operation}: {detail}")]
    Validation {
        entity: String,
        operation: &'static str,
        detail: String,
    },
    #[error("{entity} not found during {operation}")]
    NotFound {
        entity: String,
        operation: &'static str,
    },
    #[error("storage error on {entity} during {operation}: {source}")]
    Db {
        entity: String,
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl EngineError {
    pub fn invalid_reference(
        entity: impl ToString,
        operation: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        EngineError::InvalidReference {
            entity: entity.to_string(),
            operation,
            detail: detail.into(),
        }
    }

    pub fn integrity(
        entity: impl ToString,
        operation: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        EngineError::IntegrityViolation {
            entity: entity.to_string(),
            operation,
            detail: detail.into(),
        }
    }

    pub fn conflict(
        entity: impl ToString,
        operation: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        EngineError::ConcurrencyConflict {
            entity: entity.to_string(),
            operation,
            detail: detail.into(),
        }
    }

    pub fn validation(
        entity: impl ToString,
        operation: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        EngineError::Validation {
            entity: entity.to_string(),
            operation,
            detail: detail.into(),
        }
    }

    pub fn not_found(entity: impl ToString, operation: &'static str) -> Self {
        EngineError::NotFound {
            entity: entity.to_string(),
            operation,
        }
    }

    pub fn terminal(
        entity: impl ToString,
        operation: &'static str,
        status: CommissionStatus,
    ) -> Self {
        EngineError::TerminalStateViolation {
            entity: entity.to_string(),
            operation,
            status,
        }
    }

    /// Classify a storage error. Lock contention becomes a conflict, constraint failures
    /// become reference or integrity errors, pool exhaustion becomes a timeout.
    pub fn from_db(err: sqlx::Error, entity: impl ToString, operation: &'static str) -> Self {
        let entity = entity.to_string();

        if let sqlx::Error::PoolTimedOut = err {
            return EngineError::Timeout {
                entity,
                operation,
                after_ms: 0,
            };
        }

        let code = match &err {
            sqlx::Error::Database(db) => db.code().and_then(|c| c.parse::<i64>().ok()),
            _ => None,
        };

        match code {
            Some(c) if c & 0xff == SQLITE_BUSY || c & 0xff == SQLITE_LOCKED => {
                EngineError::ConcurrencyConflict {
                    entity,
                    operation,
                    detail: err.to_string(),
                }
            }
            Some(SQLITE_CONSTRAINT_FOREIGNKEY) => EngineError::InvalidReference {
                entity,
                operation,
                detail: err.to_string(),
            },
            Some(c) if c & 0xff == SQLITE_CONSTRAINT => EngineError::IntegrityViolation {
                entity,
                operation,
                detail: err.to_string(),
            },
            _ => EngineError::Db {
                entity,
                operation,
                source: err,
            },
        }
    }

    /// Replace the placeholder context left by `?` on a bare storage error.
    pub fn within(self, entity: impl ToString, operation: &'static str) -> Self {
        match self {
            EngineError::Db {
                entity: e,
                operation: o,
                source,
            } if o == UNSCOPED => EngineError::Db {
                entity: if e.is_empty() { entity.to_string() } else { e },
                operation,
                source,
            },
            EngineError::ConcurrencyConflict {
                entity: e,
                operation: o,
                detail,
            } if o == UNSCOPED => EngineError::ConcurrencyConflict {
                entity: if e.is_empty() { entity.to_string() } else { e },
                operation,
                detail,
            },
            EngineError::IntegrityViolation {
                entity: e,
                operation: o,
                detail,
            } if o == UNSCOPED => EngineError::IntegrityViolation {
                entity: if e.is_empty() { entity.to_string() } else { e },
                operation,
                detail,
            },
            EngineError::InvalidReference {
                entity: e,
                operation: o,
                detail,
            } if o == UNSCOPED => EngineError::InvalidReference {
                entity: if e.is_empty() { entity.to_string() } else { e },
                operation,
                detail,
            },
            EngineError::Timeout {
                entity: e,
                operation: o,
                after_ms,
            } if o == UNSCOPED => EngineError::Timeout {
                entity: if e.is_empty() { entity.to_string() } else { e },
                operation,
                after_ms,
            },
            other => other,
        }
    }

    /// Safe to retry with the same inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout { .. } | EngineError::ConcurrencyConflict { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidReference { .. } => "invalid_reference",
            EngineError::IntegrityViolation { .. } => "integrity_violation",
            EngineError::Timeout { .. } => "timeout",
            EngineError::ConcurrencyConflict { .. } => "concurrency_conflict",
            EngineError::TerminalStateViolation { .. } => "terminal_state_violation",
            EngineError::Validation { .. } => "validation",
            EngineError::NotFound { .. } => "not_found",
            EngineError::Db { .. } => "storage",
        }
    }
}

const UNSCOPED: &str = "unscoped";

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::from_db(err, "", UNSCOPED)
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, retryable, error_message) = match self {
            AppError::Engine(err) => {
                let status = match &err {
                    EngineError::InvalidReference { .. } => StatusCode::BAD_REQUEST,
                    EngineError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
                    EngineError::TerminalStateViolation { .. }
                    | EngineError::ConcurrencyConflict { .. }
                    | EngineError::IntegrityViolation { .. } => StatusCode::CONFLICT,
                    EngineError::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    EngineError::Db { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.kind(), err.is_retryable(), err.to_string())
            }
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", false, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", false, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", false, msg),
        };

        if status.is_server_error() {
            tracing::error!(kind = kind, "{}", error_message);
        }

        let body = Json(json!({
            "error": error_message,
            "kind": kind,
            "retryable": retryable,
        }));

        (status, body).into_response()
    }
}

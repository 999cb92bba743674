// Error taxonomy shared by every driver, plus per-engine code classifiers

use serde::Serialize;

/// Error surfaced to callers of the core.
///
/// Crosses the IPC boundary as `{"kind": "<Variant>", "message": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", content = "message")]
pub enum DbError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    #[error("Pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Syntax error: {0}")]
    SyntaxError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Partial failure: {0}")]
    PartialFailure(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl DbError {
    pub fn message(&self) -> &str {
        match self {
            DbError::ConnectionError(m)
            | DbError::UnknownConnection(m)
            | DbError::PoolExhausted(m)
            | DbError::SyntaxError(m)
            | DbError::QueryError(m)
            | DbError::ConstraintViolation(m)
            | DbError::TypeMismatch(m)
            | DbError::ValidationError(m)
            | DbError::PartialFailure(m)
            | DbError::Cancelled(m)
            | DbError::IoError(m) => m,
        }
    }

    /// Any failure while establishing a session is a connection failure.
    pub fn into_connection_error(self) -> DbError {
        match self {
            DbError::ConnectionError(_) | DbError::ValidationError(_) | DbError::Cancelled(_) => {
                self
            }
            other => DbError::ConnectionError(other.message().to_string()),
        }
    }

    /// Prefix the message with the operation that failed.
    pub fn context(self, operation: &str) -> DbError {
        let wrap = |m: String| format!("{}: {}", operation, m);
        match self {
            DbError::ConnectionError(m) => DbError::ConnectionError(wrap(m)),
            DbError::UnknownConnection(m) => DbError::UnknownConnection(m),
            DbError::PoolExhausted(m) => DbError::PoolExhausted(wrap(m)),
            DbError::SyntaxError(m) => DbError::SyntaxError(wrap(m)),
            DbError::QueryError(m) => DbError::QueryError(wrap(m)),
            DbError::ConstraintViolation(m) => DbError::ConstraintViolation(wrap(m)),
            DbError::TypeMismatch(m) => DbError::TypeMismatch(wrap(m)),
            DbError::ValidationError(m) => DbError::ValidationError(wrap(m)),
            DbError::PartialFailure(m) => DbError::PartialFailure(wrap(m)),
            DbError::Cancelled(m) => DbError::Cancelled(m),
            DbError::IoError(m) => DbError::IoError(wrap(m)),
        }
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        DbError::IoError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for DbError {
    fn from(err: tokio::task::JoinError) -> Self {
        DbError::QueryError(format!("worker task failed: {}", err))
    }
}

// ============================================================================
// Engine code classifiers
// ============================================================================

/// PostgreSQL / CockroachDB SQLSTATE.
pub fn classify_sqlstate(code: &str, message: String) -> DbError {
    match code {
        "42601" | "42000" => DbError::SyntaxError(message),
        "22P02" | "22007" | "22008" | "22003" | "22018" | "42804" => DbError::TypeMismatch(message),
        "57014" => DbError::Cancelled(message),
        c if c.starts_with("23") => DbError::ConstraintViolation(message),
        c if c.starts_with("28") || c.starts_with("08") || c.starts_with("3D") => {
            DbError::ConnectionError(message)
        }
        _ => DbError::QueryError(message),
    }
}

/// MySQL / MariaDB server error number.
pub fn classify_mysql(code: u16, message: String) -> DbError {
    match code {
        1064 | 1149 => DbError::SyntaxError(message),
        1366 | 1292 | 1264 | 1265 | 1367 | 3140 => DbError::TypeMismatch(message),
        1062 | 1451 | 1452 | 1048 | 1216 | 1217 | 3819 => DbError::ConstraintViolation(message),
        1317 => DbError::Cancelled(message),
        1044 | 1045 | 1049 | 1130 | 1251 => DbError::ConnectionError(message),
        _ => DbError::QueryError(message),
    }
}

/// SQL Server error number.
pub fn classify_mssql(code: u32, message: String) -> DbError {
    match code {
        102 | 156 | 105 | 170 => DbError::SyntaxError(message),
        245 | 8114 | 241 | 242 | 8115 | 220 | 248 => DbError::TypeMismatch(message),
        2627 | 2601 | 547 | 515 => DbError::ConstraintViolation(message),
        18456 | 18486 | 18487 | 18488 | 4060 => DbError::ConnectionError(message),
        _ => DbError::QueryError(message),
    }
}

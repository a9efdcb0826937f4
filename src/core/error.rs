use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{message}: {source}")]
    Backend {
        message: String,
        /// Statement being executed when the driver failed, if known
        sql: Option<String>,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Wraps a driver error together with the statement that triggered it.
    pub fn backend(message: impl Into<String>, sql: &str, source: rusqlite::Error) -> Self {
        Self::Backend {
            message: message.into(),
            sql: Some(sql.to_string()),
            source,
        }
    }

    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Backend { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }

    /// True for unique/primary key violations reported by the database.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Self::Backend {
                source: rusqlite::Error::SqliteFailure(err, _),
                ..
            } => err.code == rusqlite::ErrorCode::ConstraintViolation,
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(source: rusqlite::Error) -> Self {
        Self::Backend {
            message: "Database error".to_string(),
            sql: None,
            source,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_keeps_statement() {
        let err = StorageError::backend(
            "Could not select",
            "SELECT 1",
            rusqlite::Error::QueryReturnedNoRows,
        );
        assert_eq!(err.sql(), Some("SELECT 1"));
        assert!(err.to_string().starts_with("Could not select"));
        assert!(!err.is_constraint_violation());
    }

    #[test]
    fn test_plain_errors_have_no_statement() {
        let err = StorageError::InvalidArgument("Illegal name: a/b".into());
        assert!(err.sql().is_none());
        assert_eq!(err.to_string(), "Invalid argument: Illegal name: a/b");
    }
}

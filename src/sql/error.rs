//! SQL error definitions

use std::error::Error;
use std::fmt;

/// Outcome classification of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlStatus {
    #[default]
    Success,
    /// The statement failed but the connection is still usable
    Error,
    /// The connection must be rebuilt before further queries succeed
    ServerGone,
}

/// Error details attached to a [`crate::sql::QueryResult`]
#[derive(Debug, Clone, Default)]
pub struct ErrorInfo {
    pub error_code: String,
    pub error_message: String,
    pub status: SqlStatus,
}

impl ErrorInfo {
    pub fn success(&self) -> bool {
        self.status == SqlStatus::Success
    }

    pub fn server_gone(&self) -> bool {
        self.status == SqlStatus::ServerGone
    }
}

/// A failed SQL statement
#[derive(Debug, Clone)]
pub struct SqlError {
    pub code: String,
    pub message: String,
    pub status: SqlStatus,
}

impl SqlError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: SqlStatus) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status,
        }
    }

    pub fn server_gone(&self) -> bool {
        self.status == SqlStatus::ServerGone
    }
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error while executing query: {} {}",
            self.code, self.message
        )
    }
}

impl Error for SqlError {}

/// Result type for SQL operations
pub type SqlResult<T> = Result<T, SqlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_error_display() {
        let err = SqlError::new("42P01", "relation does not exist", SqlStatus::Error);
        assert_eq!(
            err.to_string(),
            "Error while executing query: 42P01 relation does not exist"
        );
        assert!(!err.server_gone());

        let gone = SqlError::new("57P01", "terminating connection", SqlStatus::ServerGone);
        assert!(gone.server_gone());
    }
}

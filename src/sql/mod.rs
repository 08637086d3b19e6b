//! SQL connection façade
//!
//! The actual wire-protocol client lives behind the [`SqlDriver`] trait;
//! the engine only ever talks to a [`LoggedConnection`], which logs every
//! statement and accumulates the time spent inside the server. Workers own
//! their connection exclusively and rebuild it through a [`SqlConnector`]
//! factory when the server goes away.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{error, info};

mod error;
pub mod mock;

pub use error::{ErrorInfo, SqlError, SqlResult, SqlStatus};

/// One result row; `None` values are SQL NULLs
#[derive(Debug, Clone, Default)]
pub struct RowView {
    pub values: Vec<Option<String>>,
}

/// Cursor over the rows of a query result
pub trait ResultRows: Send {
    fn num_fields(&self) -> usize;
    fn num_rows(&self) -> usize;
    fn next_row(&mut self) -> Option<RowView>;
}

/// Result of a single statement
pub struct QueryResult {
    /// The executed statement, echoed back
    pub query: String,
    pub executed_at: SystemTime,
    pub execution_time: Duration,
    pub error_info: ErrorInfo,
    pub affected_rows: u64,
    pub rows: Option<Box<dyn ResultRows>>,
}

impl std::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("query", &self.query)
            .field("executed_at", &self.executed_at)
            .field("execution_time", &self.execution_time)
            .field("error_info", &self.error_info)
            .field("affected_rows", &self.affected_rows)
            .finish_non_exhaustive()
    }
}

impl QueryResult {
    pub fn success(&self) -> bool {
        self.error_info.success()
    }

    /// Convert a failed result into an [`SqlError`]
    pub fn check(self) -> SqlResult<QueryResult> {
        if self.success() {
            Ok(self)
        } else {
            Err(SqlError::new(
                self.error_info.error_code.clone(),
                self.error_info.error_message.clone(),
                self.error_info.status,
            ))
        }
    }
}

/// Driver boundary: the engine is generic over the actual client library
pub trait SqlDriver: Send {
    /// Execute one statement and report its outcome; must not panic on
    /// server errors, which are returned through the result's `error_info`
    fn execute(&mut self, query: &str) -> QueryResult;

    /// Tear down and rebuild the underlying connection
    fn reconnect(&mut self) -> SqlResult<()>;

    /// Server version string
    fn server_info(&self) -> String;

    /// Host description (address, socket, ...)
    fn host_info(&self) -> String;
}

/// Factory producing fresh connections for workers
pub type SqlConnector = Arc<dyn Fn() -> SqlResult<LoggedConnection> + Send + Sync>;

/// Statement-logging wrapper around a driver
///
/// Accumulates server-side execution time between
/// `reset_accumulated_sql_time` calls so the worker can attribute SQL time
/// to individual actions.
pub struct LoggedConnection {
    driver: Box<dyn SqlDriver>,
    name: String,
    accumulated_sql_time: Duration,
}

impl LoggedConnection {
    pub fn new(driver: Box<dyn SqlDriver>, name: impl Into<String>) -> Self {
        Self {
            driver,
            name: name.into(),
            accumulated_sql_time: Duration::ZERO,
        }
    }

    /// Execute a statement, logging it and its outcome
    pub fn execute(&mut self, query: &str) -> QueryResult {
        info!(connection = %self.name, "Statement: {}", query);

        let result = self.driver.execute(query);
        self.accumulated_sql_time += result.execution_time;

        if !result.success() {
            error!(
                connection = %self.name,
                "Error while executing SQL statement: {} {}",
                result.error_info.error_code,
                result.error_info.error_message
            );
        }

        result
    }

    /// Execute and return the first column of the first row
    pub fn query_single_value(&mut self, query: &str) -> Option<String> {
        let result = self.execute(query);
        if !result.success() {
            return None;
        }

        let mut rows = match result.rows {
            Some(rows) => rows,
            None => {
                error!(connection = %self.name, "Received no data from the server");
                return None;
            }
        };

        if rows.num_fields() < 1 || rows.num_rows() < 1 {
            error!(connection = %self.name, "Received no data from the server");
            return None;
        }

        rows.next_row().and_then(|row| row.values.into_iter().next().flatten())
    }

    pub fn reconnect(&mut self) -> SqlResult<()> {
        self.driver.reconnect()
    }

    pub fn server_info(&self) -> String {
        self.driver.server_info()
    }

    pub fn host_info(&self) -> String {
        self.driver.host_info()
    }

    pub fn accumulated_sql_time(&self) -> Duration {
        self.accumulated_sql_time
    }

    pub fn reset_accumulated_sql_time(&mut self) {
        self.accumulated_sql_time = Duration::ZERO;
    }
}

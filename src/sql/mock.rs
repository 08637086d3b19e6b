//! In-memory scriptable SQL driver
//!
//! Stands in for a real server in unit tests and in the bench tool. Every
//! statement succeeds unless a canned response was queued; all executed
//! statements are recorded for inspection. The driver handle is cloneable,
//! so a test keeps one handle while the connection owns another.

use crate::sql::{ErrorInfo, QueryResult, ResultRows, RowView, SqlDriver, SqlResult, SqlStatus};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Default)]
struct MockResponse {
    error: Option<(String, String, SqlStatus)>,
    rows: Option<Vec<Vec<Option<String>>>>,
    affected_rows: u64,
}

struct MockState {
    responses: VecDeque<MockResponse>,
    executed: Vec<String>,
    reconnects: usize,
    execution_time: Duration,
    record_statements: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            responses: VecDeque::new(),
            executed: Vec::new(),
            reconnects: 0,
            execution_time: Duration::ZERO,
            record_statements: true,
        }
    }
}

/// Cloneable handle to a scriptable driver
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report this duration as the execution time of every statement
    pub fn with_execution_time(self, execution_time: Duration) -> Self {
        self.state.lock().execution_time = execution_time;
        self
    }

    /// Disable statement recording for long-running stress use
    pub fn with_recording(self, record_statements: bool) -> Self {
        self.state.lock().record_statements = record_statements;
        self
    }

    /// Queue a failing response for the next unmatched statement
    pub fn push_error(&self, code: &str, message: &str, status: SqlStatus) {
        self.state.lock().responses.push_back(MockResponse {
            error: Some((code.to_string(), message.to_string(), status)),
            ..MockResponse::default()
        });
    }

    /// Queue a result set for the next statement
    pub fn push_rows(&self, rows: Vec<Vec<Option<String>>>) {
        self.state.lock().responses.push_back(MockResponse {
            rows: Some(rows),
            ..MockResponse::default()
        });
    }

    /// All statements executed so far, in order
    pub fn executed_queries(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    /// Number of statements executed so far
    pub fn executed_count(&self) -> usize {
        self.state.lock().executed.len()
    }

    /// How many times the driver was asked to reconnect
    pub fn reconnect_count(&self) -> usize {
        self.state.lock().reconnects
    }

    /// Drop recorded statements and queued responses
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.responses.clear();
        state.executed.clear();
    }
}

struct VecRows {
    rows: VecDeque<Vec<Option<String>>>,
    num_fields: usize,
    num_rows: usize,
}

impl VecRows {
    fn new(rows: Vec<Vec<Option<String>>>) -> Self {
        let num_fields = rows.first().map(|r| r.len()).unwrap_or(0);
        let num_rows = rows.len();
        Self {
            rows: rows.into(),
            num_fields,
            num_rows,
        }
    }
}

impl ResultRows for VecRows {
    fn num_fields(&self) -> usize {
        self.num_fields
    }

    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn next_row(&mut self) -> Option<RowView> {
        self.rows.pop_front().map(|values| RowView { values })
    }
}

impl SqlDriver for MockDriver {
    fn execute(&mut self, query: &str) -> QueryResult {
        let mut state = self.state.lock();
        if state.record_statements {
            state.executed.push(query.to_string());
        }

        let response = state.responses.pop_front().unwrap_or_default();
        let execution_time = state.execution_time;
        drop(state);

        let error_info = match &response.error {
            Some((code, message, status)) => ErrorInfo {
                error_code: code.clone(),
                error_message: message.clone(),
                status: *status,
            },
            None => ErrorInfo::default(),
        };

        QueryResult {
            query: query.to_string(),
            executed_at: SystemTime::now(),
            execution_time,
            error_info,
            affected_rows: response.affected_rows,
            rows: response.rows.map(|rows| Box::new(VecRows::new(rows)) as Box<dyn ResultRows>),
        }
    }

    fn reconnect(&mut self) -> SqlResult<()> {
        self.state.lock().reconnects += 1;
        Ok(())
    }

    fn server_info(&self) -> String {
        "mock".to_string()
    }

    fn host_info(&self) -> String {
        "mock://in-memory".to_string()
    }
}

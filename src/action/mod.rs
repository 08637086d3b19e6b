//! Action model
//!
//! Actions are SQL statements. An action can result in zero (in case of an
//! error), one (typical success) or more (CASCADE operations) changes to
//! the metadata. Actions are stateless, which allows retry logic.
//!
//! Execution returns a sum-typed error; the worker loop is the single
//! classifier that turns it into statistics and the reconnect policy.

use crate::metadata::{Metadata, MetadataError, TablePtr};
use crate::random::RandomSource;
use crate::sql::{LoggedConnection, SqlError};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

pub mod ddl;
pub mod dml;
mod registry;

pub use ddl::{
    AlterCommands, AlterTable, CreateIndex, CreatePartition, CreateTable, DdlConfig, DropIndex,
    DropPartition, DropTable, RenameTable,
};
pub use dml::{CustomSql, DeleteData, DmlConfig, Inject, InsertData, UpdateOneRow};
pub use registry::{default_registry, ActionFactory, ActionRegistry};

/// Action-local precondition failure
///
/// `name` is a stable machine-readable identifier (`empty-metadata`,
/// `action-not-found`, ...) used as a statistics key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionError {
    pub name: String,
    pub message: String,
}

impl ActionError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.name)
    }
}

impl Error for ActionError {}

/// Everything that can go wrong while executing an action
#[derive(Debug)]
pub enum ExecutionError {
    /// Action-local precondition not met; the worker continues
    Action(ActionError),
    /// The SQL statement failed; server-gone status drives reconnects
    Sql(SqlError),
    /// Reservation protocol misuse
    Metadata(MetadataError),
    /// Anything else
    Other(String),
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::Action(err) => write!(f, "Action failed: {}", err),
            ExecutionError::Sql(err) => write!(f, "{}", err),
            ExecutionError::Metadata(err) => write!(f, "Metadata error: {}", err),
            ExecutionError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl Error for ExecutionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExecutionError::Action(err) => Some(err),
            ExecutionError::Sql(err) => Some(err),
            ExecutionError::Metadata(err) => Some(err),
            ExecutionError::Other(_) => None,
        }
    }
}

impl From<ActionError> for ExecutionError {
    fn from(err: ActionError) -> Self {
        ExecutionError::Action(err)
    }
}

impl From<SqlError> for ExecutionError {
    fn from(err: SqlError) -> Self {
        ExecutionError::Sql(err)
    }
}

impl From<MetadataError> for ExecutionError {
    fn from(err: MetadataError) -> Self {
        ExecutionError::Metadata(err)
    }
}

/// Result type for action execution
pub type ActionResult<T> = Result<T, ExecutionError>;

/// A stateless unit of work against the database
pub trait Action {
    fn execute(
        &self,
        meta: &Metadata,
        rand: &mut RandomSource,
        conn: &mut LoggedConnection,
    ) -> ActionResult<()>;
}

/// Boxed action handed out by factories
pub type DynAction = Box<dyn Action>;

/// Callback invoked with the table a CreateTable installed
pub type TableCallback = Arc<dyn Fn(TablePtr) + Send + Sync>;

/// Supplier of a specific table for follow-on actions
pub type TableLocator = Arc<dyn Fn() -> Option<TablePtr> + Send + Sync>;

/// Settings shared by all actions of a workload
#[derive(Debug, Clone, Default)]
pub struct AllConfig {
    pub ddl: DdlConfig,
    pub dml: DmlConfig,
    pub custom: CustomConfig,
}

/// Settings for scenario-defined custom actions
#[derive(Debug, Clone, Default)]
pub struct CustomConfig {}

/// Runs the contained actions in order, stopping at the first failure
///
/// The shared state actions need during setup (e.g. handing the created
/// table to a follow-on insert) is captured by the factory closures that
/// build the composite.
pub struct CompositeAction {
    actions: Vec<DynAction>,
}

impl CompositeAction {
    pub fn new(actions: Vec<DynAction>) -> Self {
        Self { actions }
    }
}

impl Action for CompositeAction {
    fn execute(
        &self,
        meta: &Metadata,
        rand: &mut RandomSource,
        conn: &mut LoggedConnection,
    ) -> ActionResult<()> {
        for action in &self.actions {
            action.execute(meta, rand, conn)?;
        }
        Ok(())
    }
}

/// Runs the inner action exactly `count` times
pub struct RepeatAction {
    action: DynAction,
    count: usize,
}

impl RepeatAction {
    pub fn new(action: DynAction, count: usize) -> Self {
        Self { action, count }
    }
}

impl Action for RepeatAction {
    fn execute(
        &self,
        meta: &Metadata,
        rand: &mut RandomSource,
        conn: &mut LoggedConnection,
    ) -> ActionResult<()> {
        for _ in 0..self.count {
            self.action.execute(meta, rand, conn)?;
        }
        Ok(())
    }
}

/// Pick a random table from the catalog
///
/// Slots can empty out under concurrent drops, so this retries a bounded
/// number of times before giving up.
pub fn find_random_table(meta: &Metadata, rand: &mut RandomSource) -> ActionResult<TablePtr> {
    if meta.size() == 0 {
        return Err(ActionError::new(
            "empty-metadata",
            "Can't find random table: metadata is empty",
        )
        .into());
    }

    for _ in 0..10 {
        let size = meta.size();
        if size == 0 {
            break;
        }
        let idx = rand.random_number(0usize, size - 1);
        if let Some(table) = meta.get(idx) {
            return Ok(table);
        }
    }

    Err(ActionError::new(
        "empty-metadata",
        "Can't find random table: no result in 10 tries",
    )
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::mock::MockDriver;

    struct CountingAction {
        counter: Arc<parking_lot::Mutex<usize>>,
    }

    impl Action for CountingAction {
        fn execute(
            &self,
            _meta: &Metadata,
            _rand: &mut RandomSource,
            _conn: &mut LoggedConnection,
        ) -> ActionResult<()> {
            *self.counter.lock() += 1;
            Ok(())
        }
    }

    fn test_conn() -> LoggedConnection {
        LoggedConnection::new(Box::new(MockDriver::new()), "test")
    }

    #[test]
    fn test_repeat_action_runs_n_times() {
        let meta = Metadata::new();
        let mut rand = RandomSource::new(1);
        let mut conn = test_conn();

        let counter = Arc::new(parking_lot::Mutex::new(0));
        let action = RepeatAction::new(
            Box::new(CountingAction {
                counter: Arc::clone(&counter),
            }),
            7,
        );

        action.execute(&meta, &mut rand, &mut conn).unwrap();
        assert_eq!(*counter.lock(), 7);
    }

    #[test]
    fn test_composite_runs_in_order_and_stops_on_error() {
        struct FailingAction;
        impl Action for FailingAction {
            fn execute(
                &self,
                _meta: &Metadata,
                _rand: &mut RandomSource,
                _conn: &mut LoggedConnection,
            ) -> ActionResult<()> {
                Err(ActionError::new("test-failure", "always fails").into())
            }
        }

        let meta = Metadata::new();
        let mut rand = RandomSource::new(1);
        let mut conn = test_conn();

        let counter = Arc::new(parking_lot::Mutex::new(0));
        let composite = CompositeAction::new(vec![
            Box::new(CountingAction {
                counter: Arc::clone(&counter),
            }),
            Box::new(FailingAction),
            Box::new(CountingAction {
                counter: Arc::clone(&counter),
            }),
        ]);

        let err = composite.execute(&meta, &mut rand, &mut conn).unwrap_err();
        assert!(matches!(err, ExecutionError::Action(ref e) if e.name == "test-failure"));
        // the third action never ran
        assert_eq!(*counter.lock(), 1);
    }

    #[test]
    fn test_find_random_table_on_empty_metadata() {
        let meta = Metadata::new();
        let mut rand = RandomSource::new(1);

        let err = find_random_table(&meta, &mut rand).unwrap_err();
        assert!(matches!(err, ExecutionError::Action(ref e) if e.name == "empty-metadata"));
    }

    #[test]
    fn test_find_random_table_returns_existing() {
        let meta = Metadata::new();
        let mut res = meta.reserve_create();
        res.table_mut().unwrap().name = "foo".to_string();
        res.complete().unwrap();

        let mut rand = RandomSource::new(1);
        let table = find_random_table(&meta, &mut rand).unwrap();
        assert_eq!(table.name, "foo");
    }
}

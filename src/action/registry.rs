//! Action registry with weighted random lookup

use crate::action::ddl::{
    AlterCommands, AlterTable, CreateIndex, CreatePartition, CreateTable, DropIndex,
    DropPartition, DropTable, RenameTable,
};
use crate::action::dml::{CustomSql, DeleteData, Inject, InsertData, UpdateOneRow};
use crate::action::{
    ActionError, AllConfig, CompositeAction, DynAction, RepeatAction, TableLocator,
};
use crate::metadata::TablePtr;
use crate::table::TableType;
use parking_lot::Mutex;
use std::sync::Arc;

/// Builds a fresh action instance for one execution
pub type ActionBuilder = Arc<dyn Fn(&AllConfig) -> DynAction + Send + Sync>;

/// Named, weighted action factory
#[derive(Clone)]
pub struct ActionFactory {
    pub name: String,
    pub weight: usize,
    pub builder: ActionBuilder,
}

impl std::fmt::Debug for ActionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionFactory")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

impl ActionFactory {
    pub fn new(
        name: impl Into<String>,
        weight: usize,
        builder: impl Fn(&AllConfig) -> DynAction + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            weight,
            builder: Arc::new(builder),
        }
    }

    pub fn build(&self, config: &AllConfig) -> DynAction {
        (self.builder)(config)
    }
}

/// Thread-safe mapping from action name to factory and weight
///
/// All operations, mutating and reading, serialize on one mutex; the
/// weighted lookup stays atomic with respect to parallel registration.
#[derive(Default)]
pub struct ActionRegistry {
    factories: Mutex<Vec<ActionFactory>>,
}

impl Clone for ActionRegistry {
    fn clone(&self) -> Self {
        Self {
            factories: Mutex::new(self.factories.lock().clone()),
        }
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_factories(factories: Vec<ActionFactory>) -> Self {
        Self {
            factories: Mutex::new(factories),
        }
    }

    /// Register a factory; names are unique
    pub fn insert(&self, factory: ActionFactory) -> Result<usize, ActionError> {
        let mut factories = self.factories.lock();

        if factories.iter().any(|f| f.name == factory.name) {
            return Err(ActionError::new(
                "action-already-exists",
                format!("Action {} already exists in this registry", factory.name),
            ));
        }

        factories.push(factory);
        Ok(factories.len() - 1)
    }

    /// Unregister by name
    pub fn remove(&self, name: &str) -> Result<(), ActionError> {
        let mut factories = self.factories.lock();

        match factories.iter().position(|f| f.name == name) {
            Some(position) => {
                factories.remove(position);
                Ok(())
            }
            None => Err(ActionError::new(
                "action-not-found",
                format!("Action {} does not exist in this registry", name),
            )),
        }
    }

    /// Look up a factory by name
    pub fn get(&self, name: &str) -> Result<ActionFactory, ActionError> {
        self.factories
            .lock()
            .iter()
            .find(|f| f.name == name)
            .cloned()
            .ok_or_else(|| {
                ActionError::new(
                    "action-not-found",
                    format!("Action {} does not exist in this registry", name),
                )
            })
    }

    pub fn has(&self, name: &str) -> bool {
        self.factories.lock().iter().any(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.factories.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.lock().is_empty()
    }

    /// Sum of all registered weights
    pub fn total_weight(&self) -> usize {
        self.factories.lock().iter().map(|f| f.weight).sum()
    }

    /// Select the factory owning the offset, drawn from `[0, total_weight)`
    pub fn lookup_by_weight_offset(&self, offset: usize) -> Result<ActionFactory, ActionError> {
        let factories = self.factories.lock();

        let mut accum = 0;
        for factory in factories.iter() {
            accum += factory.weight;
            if accum > offset {
                return Ok(factory.clone());
            }
        }

        Err(ActionError::new(
            "weight-offset-out-of-range",
            format!("Weight offset {} is outside of this registry", offset),
        ))
    }

    /// Register a fixed SQL statement as an action
    pub fn make_custom_sql_action(
        &self,
        name: &str,
        sql: &str,
        weight: usize,
    ) -> Result<usize, ActionError> {
        let sql = sql.to_string();
        self.insert(ActionFactory::new(name, weight, move |_config| {
            Box::new(CustomSql::new(sql.clone(), None))
        }))
    }

    /// Register a SQL statement with `{table}` substituted per execution
    pub fn make_custom_table_sql_action(
        &self,
        name: &str,
        sql: &str,
        weight: usize,
    ) -> Result<usize, ActionError> {
        let sql = sql.to_string();
        self.insert(ActionFactory::new(name, weight, move |_config| {
            Box::new(CustomSql::new(sql.clone(), Some(Inject::Table)))
        }))
    }
}

/// Create-table composite: the new table is handed from the create action
/// to a follow-on bulk insert through a shared slot.
fn create_table_composite(config: &AllConfig, table_type: TableType) -> DynAction {
    let slot: Arc<Mutex<Option<TablePtr>>> = Arc::new(Mutex::new(None));

    let callback_slot = Arc::clone(&slot);
    let mut create = CreateTable::new(config.ddl.clone(), table_type);
    create.set_success_callback(Arc::new(move |table| {
        *callback_slot.lock() = Some(table);
    }));

    let locator_slot = Arc::clone(&slot);
    let locator: TableLocator = Arc::new(move || locator_slot.lock().clone());

    Box::new(CompositeAction::new(vec![
        Box::new(create),
        Box::new(RepeatAction::new(
            Box::new(InsertData::with_locator(1000, locator)),
            1,
        )),
    ]))
}

/// The standard action mix
pub fn default_registry() -> ActionRegistry {
    ActionRegistry::with_factories(vec![
        ActionFactory::new("create_normal_table", 100, |config| {
            create_table_composite(config, TableType::Normal)
        }),
        ActionFactory::new("create_partitioned_table", 100, |config| {
            create_table_composite(config, TableType::Partitioned)
        }),
        ActionFactory::new("drop_table", 100, |config| {
            Box::new(DropTable::new(config.ddl.clone()))
        }),
        ActionFactory::new("alter_table", 100, |config| {
            Box::new(AlterTable::new(config.ddl.clone(), AlterCommands::all()))
        }),
        ActionFactory::new("rename_table", 100, |config| {
            Box::new(RenameTable::new(config.ddl.clone()))
        }),
        ActionFactory::new("create_index", 100, |config| {
            Box::new(CreateIndex::new(config.ddl.clone()))
        }),
        ActionFactory::new("drop_index", 100, |config| {
            Box::new(DropIndex::new(config.ddl.clone()))
        }),
        ActionFactory::new("create_partition", 100, |config| {
            Box::new(CreatePartition::new(config.ddl.clone()))
        }),
        ActionFactory::new("drop_partition", 100, |config| {
            Box::new(DropPartition::new(config.ddl.clone()))
        }),
        ActionFactory::new("insert_some_data", 1000, |_config| {
            Box::new(InsertData::new(10))
        }),
        ActionFactory::new("delete_some_data", 1000, |config| {
            Box::new(DeleteData::new(config.dml.clone()))
        }),
        ActionFactory::new("update_one_row", 1000, |_config| {
            Box::new(UpdateOneRow::new())
        }),
    ])
}

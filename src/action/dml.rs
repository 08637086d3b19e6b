//! DML actions

use crate::action::{find_random_table, Action, ActionError, ActionResult, TableLocator};
use crate::metadata::{Metadata, TablePtr};
use crate::random::RandomSource;
use crate::sql::LoggedConnection;
use crate::table::{Column, RangePartitioning};
use crate::types::ColumnType;

/// Settings for the DML actions
#[derive(Debug, Clone)]
pub struct DmlConfig {
    pub delete_min: usize,
    pub delete_max: usize,
}

impl Default for DmlConfig {
    fn default() -> Self {
        Self {
            delete_min: 1,
            delete_max: 100,
        }
    }
}

/// Generate a literal for one column
///
/// Partition key values are drawn from a random existing range so the row
/// lands in a partition that actually exists.
fn generate_value(
    col: &Column,
    rand: &mut RandomSource,
    partitioning: &Option<RangePartitioning>,
) -> String {
    if col.partition_key {
        if let Some(rp) = partitioning {
            if rp.ranges.is_empty() {
                // the query will fail, but at least it is well-formed
                return "0".to_string();
            }
            let span = rp.range_size * rp.ranges.len() as u64;
            let num = rand.random_number(0u64, span - 1);
            let range = (num / rp.range_size) as usize;
            return (rp.ranges[range].rangebase * rp.range_size + (num % rp.range_size))
                .to_string();
        }
    }

    match col.col_type {
        ColumnType::Int => rand.random_number(1u64, 1_000_000).to_string(),
        ColumnType::Real => rand.random_double(1.0, 1_000_000.0).to_string(),
        ColumnType::Varchar | ColumnType::Char => {
            format!("'{}'", rand.random_string(0, col.length))
        }
        ColumnType::Text | ColumnType::Bytea => format!("'{}'", rand.random_string(50, 1000)),
        ColumnType::Bool => rand.random_bool().to_string(),
    }
}

fn primary_key_column(table: &crate::table::Table) -> ActionResult<&Column> {
    // single-column primary key as the first column, as created by the DDL
    // actions
    table.columns.first().ok_or_else(|| {
        ActionError::new(
            "missing-primary-key",
            format!("Table {} has no columns", table.name),
        )
        .into()
    })
}

/// Insert a batch of randomly generated rows
///
/// A locator pins the target table (used by the create-table composites);
/// without one a random table is picked.
pub struct InsertData {
    rows: usize,
    locator: Option<TableLocator>,
}

impl InsertData {
    pub fn new(rows: usize) -> Self {
        Self {
            rows,
            locator: None,
        }
    }

    pub fn with_locator(rows: usize, locator: TableLocator) -> Self {
        Self {
            rows,
            locator: Some(locator),
        }
    }
}

impl Action for InsertData {
    fn execute(
        &self,
        meta: &Metadata,
        rand: &mut RandomSource,
        conn: &mut LoggedConnection,
    ) -> ActionResult<()> {
        let table: TablePtr = match &self.locator {
            Some(locator) => locator().ok_or_else(|| {
                ActionError::new("empty-metadata", "Table locator has no table")
            })?,
            None => find_random_table(meta, rand)?,
        };

        let columns: Vec<&Column> = table
            .columns
            .iter()
            .filter(|c| !c.auto_increment)
            .collect();

        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();

        let mut values: Vec<String> = Vec::with_capacity(self.rows);
        for _ in 0..self.rows {
            let literals: Vec<String> = columns
                .iter()
                .map(|c| generate_value(c, rand, &table.partitioning))
                .collect();
            values.push(format!("({})", literals.join(", ")));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {};",
            table.name,
            names.join(", "),
            values.join(", ")
        );

        conn.execute(&sql).check()?;
        Ok(())
    }
}

/// Delete a random batch of rows by primary key
pub struct DeleteData {
    config: DmlConfig,
}

impl DeleteData {
    pub fn new(config: DmlConfig) -> Self {
        Self { config }
    }
}

impl Action for DeleteData {
    fn execute(
        &self,
        meta: &Metadata,
        rand: &mut RandomSource,
        conn: &mut LoggedConnection,
    ) -> ActionResult<()> {
        let table = find_random_table(meta, rand)?;
        let pk = primary_key_column(&table)?;

        let rows = rand.random_number(self.config.delete_min, self.config.delete_max);

        conn.execute(&format!(
            "DELETE FROM {} WHERE {} IN (SELECT {} FROM {} ORDER BY random() LIMIT {});",
            table.name, pk.name, pk.name, table.name, rows
        ))
        .check()?;
        Ok(())
    }
}

/// Rewrite every generated column of one random row
pub struct UpdateOneRow;

impl UpdateOneRow {
    pub fn new() -> Self {
        Self
    }
}

impl Default for UpdateOneRow {
    fn default() -> Self {
        Self::new()
    }
}

impl Action for UpdateOneRow {
    fn execute(
        &self,
        meta: &Metadata,
        rand: &mut RandomSource,
        conn: &mut LoggedConnection,
    ) -> ActionResult<()> {
        let table = find_random_table(meta, rand)?;
        let pk = primary_key_column(&table)?;

        let assignments: Vec<String> = table
            .columns
            .iter()
            .filter(|c| !c.auto_increment)
            .map(|c| format!("{} = {}", c.name, generate_value(c, rand, &table.partitioning)))
            .collect();

        if assignments.is_empty() {
            return Ok(());
        }

        conn.execute(&format!(
            "UPDATE {} SET {} WHERE {} IN (SELECT {} FROM {} ORDER BY random() LIMIT 1);",
            table.name,
            assignments.join(", "),
            pk.name,
            pk.name,
            table.name
        ))
        .check()?;
        Ok(())
    }
}

/// Placeholder substitution mode for [`CustomSql`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inject {
    /// Replace `{table}` with a random table name
    Table,
}

/// Execute a scenario-supplied statement
pub struct CustomSql {
    sql: String,
    inject: Option<Inject>,
}

impl CustomSql {
    pub fn new(sql: impl Into<String>, inject: Option<Inject>) -> Self {
        Self {
            sql: sql.into(),
            inject,
        }
    }
}

impl Action for CustomSql {
    fn execute(
        &self,
        meta: &Metadata,
        rand: &mut RandomSource,
        conn: &mut LoggedConnection,
    ) -> ActionResult<()> {
        let sql = match self.inject {
            Some(Inject::Table) => {
                let table = find_random_table(meta, rand)?;
                self.sql.replace("{table}", &table.name)
            }
            None => self.sql.clone(),
        };

        conn.execute(&sql).check()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use crate::sql::mock::MockDriver;
    use crate::table::{RangePartition, Table};
    use std::sync::Arc;

    fn setup() -> (Metadata, RandomSource, MockDriver, LoggedConnection) {
        let meta = Metadata::new();
        let rand = RandomSource::new(7);
        let driver = MockDriver::new();
        let conn = LoggedConnection::new(Box::new(driver.clone()), "test");
        (meta, rand, driver, conn)
    }

    fn install_table(meta: &Metadata, table: Table) {
        let mut res = meta.reserve_create();
        *res.table_mut().unwrap() = table;
        res.complete().unwrap();
    }

    fn sample_table() -> Table {
        let mut table = Table::new("sample");
        let mut pk = Column::new("id", ColumnType::Int);
        pk.primary_key = true;
        pk.auto_increment = true;
        table.columns.push(pk);

        let mut name = Column::new("name", ColumnType::Varchar);
        name.length = 16;
        table.columns.push(name);

        table.columns.push(Column::new("flag", ColumnType::Bool));
        table
    }

    #[test]
    fn test_insert_data_skips_serial_column() {
        let (meta, mut rand, driver, mut conn) = setup();
        install_table(&meta, sample_table());

        InsertData::new(3)
            .execute(&meta, &mut rand, &mut conn)
            .unwrap();

        let queries = driver.executed_queries();
        assert_eq!(queries.len(), 1);
        let sql = &queries[0];
        assert!(sql.starts_with("INSERT INTO sample (name, flag) VALUES"));
        assert!(!sql.contains("id"));
        // three value tuples
        assert_eq!(sql.matches('(').count(), 1 + 3);
    }

    #[test]
    fn test_insert_data_partition_key_stays_in_ranges() {
        let (meta, mut rand, driver, mut conn) = setup();

        let mut table = Table::new("parted");
        let mut pk = Column::new("id", ColumnType::Int);
        pk.primary_key = true;
        pk.partition_key = true;
        table.columns.push(pk);

        let mut partitioning = RangePartitioning::default();
        // a hole between the ranges: bases 2 and 5
        partitioning.ranges.push(RangePartition::new(2));
        partitioning.ranges.push(RangePartition::new(5));
        let range_size = partitioning.range_size;
        table.partitioning = Some(partitioning);
        install_table(&meta, table);

        for _ in 0..50 {
            InsertData::new(1)
                .execute(&meta, &mut rand, &mut conn)
                .unwrap();
        }

        for sql in driver.executed_queries() {
            let value: u64 = sql
                .split("VALUES (")
                .nth(1)
                .unwrap()
                .trim_end_matches(");")
                .parse()
                .unwrap();
            let in_first = value >= 2 * range_size && value < 3 * range_size;
            let in_second = value >= 5 * range_size && value < 6 * range_size;
            assert!(in_first || in_second, "value {} outside both ranges", value);
        }
    }

    #[test]
    fn test_insert_data_uses_locator() {
        let (meta, mut rand, driver, mut conn) = setup();
        install_table(&meta, sample_table());

        let pinned = Arc::new(sample_table());
        let pinned_clone = Arc::clone(&pinned);
        let locator: TableLocator = Arc::new(move || Some(Arc::clone(&pinned_clone)));

        InsertData::with_locator(1, locator)
            .execute(&meta, &mut rand, &mut conn)
            .unwrap();

        assert!(driver.executed_queries()[0].starts_with("INSERT INTO sample"));
    }

    #[test]
    fn test_insert_data_empty_locator_fails() {
        let (meta, mut rand, _driver, mut conn) = setup();
        let locator: TableLocator = Arc::new(|| None);

        let err = InsertData::with_locator(1, locator)
            .execute(&meta, &mut rand, &mut conn)
            .unwrap_err();
        assert!(
            matches!(err, crate::action::ExecutionError::Action(ref e) if e.name == "empty-metadata")
        );
    }

    #[test]
    fn test_delete_data_targets_primary_key() {
        let (meta, mut rand, driver, mut conn) = setup();
        install_table(&meta, sample_table());

        let config = DmlConfig {
            delete_min: 5,
            delete_max: 5,
        };
        DeleteData::new(config)
            .execute(&meta, &mut rand, &mut conn)
            .unwrap();

        let sql = &driver.executed_queries()[0];
        assert_eq!(
            sql,
            "DELETE FROM sample WHERE id IN (SELECT id FROM sample ORDER BY random() LIMIT 5);"
        );
    }

    #[test]
    fn test_update_one_row_sets_all_generated_columns() {
        let (meta, mut rand, driver, mut conn) = setup();
        install_table(&meta, sample_table());

        UpdateOneRow::new()
            .execute(&meta, &mut rand, &mut conn)
            .unwrap();

        let sql = &driver.executed_queries()[0];
        assert!(sql.starts_with("UPDATE sample SET name = "));
        assert!(sql.contains("flag = "));
        assert!(!sql.contains("id = "));
        assert!(sql.ends_with("WHERE id IN (SELECT id FROM sample ORDER BY random() LIMIT 1);"));
    }

    #[test]
    fn test_custom_sql_injects_table_name() {
        let (meta, mut rand, driver, mut conn) = setup();
        install_table(&meta, sample_table());

        CustomSql::new("VACUUM {table};", Some(Inject::Table))
            .execute(&meta, &mut rand, &mut conn)
            .unwrap();
        assert_eq!(driver.executed_queries()[0], "VACUUM sample;");
    }

    #[test]
    fn test_custom_sql_without_injection_runs_verbatim() {
        let (meta, mut rand, driver, mut conn) = setup();

        CustomSql::new("CHECKPOINT;", None)
            .execute(&meta, &mut rand, &mut conn)
            .unwrap();
        assert_eq!(driver.executed_queries()[0], "CHECKPOINT;");
    }

    #[test]
    fn test_custom_sql_injection_fails_on_empty_metadata() {
        let (meta, mut rand, _driver, mut conn) = setup();

        let err = CustomSql::new("VACUUM {table};", Some(Inject::Table))
            .execute(&meta, &mut rand, &mut conn)
            .unwrap_err();
        assert!(
            matches!(err, crate::action::ExecutionError::Action(ref e) if e.name == "empty-metadata")
        );
    }

    #[test]
    fn test_dml_actions_on_empty_metadata_fail_with_action_error() {
        let (meta, mut rand, _driver, mut conn) = setup();

        let insert_err = InsertData::new(1)
            .execute(&meta, &mut rand, &mut conn)
            .unwrap_err();
        assert!(matches!(insert_err, crate::action::ExecutionError::Action(_)));

        let delete_err = DeleteData::new(DmlConfig::default())
            .execute(&meta, &mut rand, &mut conn)
            .unwrap_err();
        assert!(matches!(delete_err, crate::action::ExecutionError::Action(_)));
    }
}

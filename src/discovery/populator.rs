//! Metadata population from discovery results

use crate::discovery::{
    ConstraintType, DiscoveredColumn, DiscoveredConstraint, DiscoveredIndex, DiscoveredPartition,
    DiscoveredTable, SchemaDiscovery,
};
use crate::metadata::Metadata;
use crate::sql::SqlResult;
use crate::table::{Column, Index, IndexColumn, RangePartition, RangePartitioning, Table};
use crate::types::IndexOrdering;
use tracing::{debug, error, info, warn};

/// Converts discovered schema records into catalog entries
///
/// Every discovered table goes through a CREATE reservation; tables that
/// do not fit (catalog full) are skipped with a warning.
pub struct MetadataPopulator<'a> {
    metadata: &'a Metadata,
}

impl<'a> MetadataPopulator<'a> {
    pub fn new(metadata: &'a Metadata) -> Self {
        Self { metadata }
    }

    pub fn populate_from_existing_database(
        &self,
        discovery: &mut SchemaDiscovery<'_>,
    ) -> SqlResult<()> {
        let tables = discovery.discover_tables()?;

        info!(
            "Starting metadata population for {} discovered tables",
            tables.len()
        );

        for discovered in &tables {
            let mut res = self.metadata.reserve_create();
            if !res.open() {
                warn!(
                    "No more table slots available, skipping table {}",
                    discovered.name
                );
                continue;
            }

            match convert_complete_table(discovery, discovered) {
                Ok(table) => {
                    if let Some(slot) = res.table_mut() {
                        *slot = table;
                    }
                    if let Err(err) = res.complete() {
                        error!(
                            "Failed to install metadata for table {}: {}",
                            discovered.name, err
                        );
                        continue;
                    }
                    debug!("Successfully populated metadata for table {}", discovered.name);
                }
                Err(err) => {
                    // the reservation cancels on drop
                    error!(
                        "Failed to populate metadata for table {}: {}",
                        discovered.name, err
                    );
                }
            }
        }

        info!(
            "Metadata population completed for {} tables",
            self.metadata.size()
        );
        Ok(())
    }
}

fn convert_complete_table(
    discovery: &mut SchemaDiscovery<'_>,
    discovered: &DiscoveredTable,
) -> SqlResult<Table> {
    let mut table = Table::new(discovered.name.clone());
    table.tablespace = discovered.tablespace.clone();
    table.table_type = discovered.table_type;
    // engine stays unset: the DDL actions do not record access methods yet

    let columns = discovery.discover_columns(&discovered.name)?;
    for discovered_col in &columns {
        table.columns.push(convert_column(discovered_col));
    }

    let indexes = discovery.discover_indexes(&discovered.name)?;
    for discovered_idx in &indexes {
        table.indexes.push(convert_index(discovered_idx));
    }

    let constraints = discovery.discover_constraints(&discovered.name)?;
    apply_constraints(&mut table, &constraints);

    let partition_keys = discovery.discover_partition_keys(&discovered.name)?;
    apply_partition_keys(&mut table, &partition_keys);

    let partitions = discovery.discover_partitions(&discovered.name)?;
    if !partitions.is_empty() {
        apply_partitioning(&mut table, &partitions);
    }

    debug!(
        "Converted table {} with {} columns, {} indexes, {} constraints, {} partitions",
        table.name,
        table.columns.len(),
        table.indexes.len(),
        constraints.len(),
        partitions.len()
    );

    Ok(table)
}

fn convert_column(discovered: &DiscoveredColumn) -> Column {
    let mut column = Column::new(discovered.name.clone(), discovered.data_type);
    column.length = discovered.length;
    column.nullable = !discovered.not_null;
    column.auto_increment = discovered.is_serial;
    column.generated = discovered.generated;

    // serial defaults carry a nextval expression that would never
    // round-trip, so they are dropped
    if !discovered.default_value.is_empty() && !discovered.is_serial {
        column.default_value = discovered.default_value.clone();
    }

    column
}

fn convert_index(discovered: &DiscoveredIndex) -> Index {
    let mut index = Index::new(discovered.name.clone(), discovered.is_unique);

    for (i, column_name) in discovered.column_names.iter().enumerate() {
        let ordering = discovered
            .orderings
            .get(i)
            .copied()
            .unwrap_or(IndexOrdering::Default);
        index.fields.push(IndexColumn::new(column_name.clone(), ordering));
    }

    index
}

fn apply_constraints(table: &mut Table, constraints: &[DiscoveredConstraint]) {
    for constraint in constraints {
        match constraint.constraint_type {
            ConstraintType::PrimaryKey => {
                for col_name in &constraint.columns {
                    if let Some(column) =
                        table.columns.iter_mut().find(|c| &c.name == col_name)
                    {
                        column.primary_key = true;
                        debug!("Marked column {} as primary key", col_name);
                    }
                }
            }
            ConstraintType::ForeignKey => {
                for col_name in &constraint.columns {
                    if let Some(column) =
                        table.columns.iter_mut().find(|c| &c.name == col_name)
                    {
                        column.foreign_key_references = constraint.referenced_table.clone();
                        debug!(
                            "Marked column {} as foreign key referencing {}",
                            col_name, constraint.referenced_table
                        );
                    }
                }
            }
            // unique and check constraints have no metadata representation
            _ => {}
        }
    }
}

fn apply_partition_keys(table: &mut Table, partition_keys: &[String]) {
    for key_col_name in partition_keys {
        match table.columns.iter_mut().find(|c| &c.name == key_col_name) {
            Some(column) => {
                column.partition_key = true;
                debug!("Marked column {} as partition key", key_col_name);
            }
            None => {
                warn!(
                    "Partition key column {} not found in table {}",
                    key_col_name, table.name
                );
            }
        }
    }
}

fn apply_partitioning(table: &mut Table, partitions: &[DiscoveredPartition]) {
    let mut partitioning = RangePartitioning::default();

    for partition in partitions {
        // range base comes from the child table name suffix: <table>_p<N>
        let rangebase = parse_rangebase(&partition.name).unwrap_or_else(|| {
            warn!(
                "Could not parse range base from partition name {}",
                partition.name
            );
            0
        });

        partitioning.ranges.push(RangePartition::new(rangebase));
        debug!("Added partition {} with range base {}", partition.name, rangebase);
    }

    table.partitioning = Some(partitioning);
}

fn parse_rangebase(partition_name: &str) -> Option<u64> {
    let suffix = &partition_name[partition_name.rfind('_')? + 1..];
    suffix.strip_prefix('p')?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::mock::MockDriver;
    use crate::sql::LoggedConnection;
    use crate::types::ColumnType;

    fn s(value: &str) -> Option<String> {
        Some(value.to_string())
    }

    /// Queue discovery results for a single normal table `foo1` with a
    /// serial pk, a varchar column and one secondary index.
    fn script_simple_table(driver: &MockDriver) {
        // tables
        driver.push_rows(vec![vec![
            s("foo1"),
            s("r"),
            s("heap"),
            s("pg_default"),
            s("f"),
            s(""),
        ]]);
        // columns
        driver.push_rows(vec![
            vec![
                s("id"),
                s("int4"),
                s("4"),
                s("-1"),
                s("t"),
                s("1"),
                s("t"),
                s("not_generated"),
                s("nextval('foo1_id_seq'::regclass)"),
            ],
            vec![
                s("name"),
                s("varchar"),
                s("-1"),
                s("36"),
                s("f"),
                s("2"),
                s("f"),
                s("not_generated"),
                s(""),
            ],
        ]);
        // indexes
        driver.push_rows(vec![vec![
            s("idx_name"),
            s("f"),
            s("name"),
            s("1"),
            s("CREATE INDEX idx_name ON foo1 (name)"),
        ]]);
        // constraints
        driver.push_rows(vec![vec![s("foo1_pkey"), s("p"), s("id"), s(""), s("")]]);
        // partition keys
        driver.push_rows(vec![]);
        // partitions
        driver.push_rows(vec![]);
    }

    #[test]
    fn test_populate_simple_table() {
        let meta = Metadata::new();
        let driver = MockDriver::new();
        script_simple_table(&driver);
        let mut conn = LoggedConnection::new(Box::new(driver.clone()), "populator-test");

        let mut discovery = SchemaDiscovery::new(&mut conn);
        MetadataPopulator::new(&meta)
            .populate_from_existing_database(&mut discovery)
            .unwrap();

        assert_eq!(meta.size(), 1);
        let table = meta.get(0).unwrap();
        assert_eq!(table.name, "foo1");
        assert_eq!(table.tablespace, "");
        assert_eq!(table.columns.len(), 2);

        let id = &table.columns[0];
        assert!(id.primary_key);
        assert!(id.auto_increment);
        assert!(!id.nullable);
        // the nextval default is discarded for serial columns
        assert!(id.default_value.is_empty());

        let name = &table.columns[1];
        assert_eq!(name.col_type, ColumnType::Varchar);
        assert_eq!(name.length, 32);
        assert!(name.nullable);

        assert_eq!(table.indexes.len(), 1);
        assert_eq!(table.indexes[0].name, "idx_name");
    }

    #[test]
    fn test_populate_partitioned_table() {
        let meta = Metadata::new();
        let driver = MockDriver::new();

        // tables
        driver.push_rows(vec![vec![
            s("parted"),
            s("p"),
            s("heap"),
            s("pg_default"),
            s("f"),
            s("RANGE"),
        ]]);
        // columns
        driver.push_rows(vec![vec![
            s("id"),
            s("int4"),
            s("4"),
            s("-1"),
            s("t"),
            s("1"),
            s("f"),
            s("not_generated"),
            s(""),
        ]]);
        // indexes
        driver.push_rows(vec![]);
        // constraints
        driver.push_rows(vec![vec![s("parted_pkey"), s("p"), s("id"), s(""), s("")]]);
        // partition keys
        driver.push_rows(vec![vec![s("id")]]);
        // partitions, out of name order on purpose
        driver.push_rows(vec![
            vec![s("parted_p0"), s("FOR VALUES FROM (0) TO (10000000)")],
            vec![s("parted_p2"), s("FOR VALUES FROM (20000000) TO (30000000)")],
        ]);

        let mut conn = LoggedConnection::new(Box::new(driver.clone()), "populator-test");
        let mut discovery = SchemaDiscovery::new(&mut conn);
        MetadataPopulator::new(&meta)
            .populate_from_existing_database(&mut discovery)
            .unwrap();

        let table = meta.get(0).unwrap();
        assert!(table.columns[0].partition_key);

        let partitioning = table.partitioning.as_ref().unwrap();
        assert_eq!(partitioning.range_size, 10_000_000);
        let bases: Vec<u64> = partitioning.ranges.iter().map(|r| r.rangebase).collect();
        assert_eq!(bases, vec![0, 2]);
    }

    #[test]
    fn test_populate_skips_failing_table_and_continues() {
        let meta = Metadata::new();
        let driver = MockDriver::new();

        // two tables discovered
        driver.push_rows(vec![
            vec![s("bad"), s("r"), s("heap"), s("pg_default"), s("f"), s("")],
            vec![s("good"), s("r"), s("heap"), s("pg_default"), s("f"), s("")],
        ]);
        // columns for "bad" fail
        driver.push_error("42501", "permission denied", crate::sql::SqlStatus::Error);
        // full scripts for "good"
        driver.push_rows(vec![vec![
            s("id"),
            s("int4"),
            s("4"),
            s("-1"),
            s("t"),
            s("1"),
            s("t"),
            s("not_generated"),
            s(""),
        ]]);
        driver.push_rows(vec![]);
        driver.push_rows(vec![]);
        driver.push_rows(vec![]);
        driver.push_rows(vec![]);

        let mut conn = LoggedConnection::new(Box::new(driver.clone()), "populator-test");
        let mut discovery = SchemaDiscovery::new(&mut conn);
        MetadataPopulator::new(&meta)
            .populate_from_existing_database(&mut discovery)
            .unwrap();

        assert_eq!(meta.size(), 1);
        assert_eq!(meta.get(0).unwrap().name, "good");
    }

    #[test]
    fn test_parse_rangebase() {
        assert_eq!(parse_rangebase("foo1_p3"), Some(3));
        assert_eq!(parse_rangebase("foo_1_p12"), Some(12));
        assert_eq!(parse_rangebase("foo1_x3"), None);
        assert_eq!(parse_rangebase("nounderscore"), None);
        assert_eq!(parse_rangebase("foo1_p"), None);
    }
}

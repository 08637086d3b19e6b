//! Schema discovery
//!
//! Read-only reconstruction of the schema from the server's own catalog.
//! The queries target the PostgreSQL system catalogs; results come back as
//! plain string rows and are mapped onto the client-side model here.

use crate::sql::{LoggedConnection, RowView, SqlResult};
use crate::table::TableType;
use crate::types::{ColumnType, Generated, IndexOrdering};
use std::collections::BTreeMap;
use tracing::debug;

mod populator;

pub use populator::MetadataPopulator;

/// Partitioning strategy reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionType {
    #[default]
    None,
    Range,
    Hash,
    List,
}

/// Constraint kinds tracked during discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConstraintType {
    PrimaryKey,
    ForeignKey,
    Unique,
    Check,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveredTable {
    pub name: String,
    pub table_type: TableType,
    pub access_method: String,
    pub tablespace: String,
    pub is_partition: bool,
    pub partition_type: PartitionType,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveredColumn {
    pub name: String,
    pub data_type: ColumnType,
    /// Character length for char/varchar types
    pub length: usize,
    pub type_modifier: i32,
    pub not_null: bool,
    pub ordinal_position: i32,
    pub is_serial: bool,
    pub generated: Generated,
    pub default_value: String,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveredIndex {
    pub name: String,
    pub is_unique: bool,
    pub column_names: Vec<String>,
    pub orderings: Vec<IndexOrdering>,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveredConstraint {
    pub name: String,
    pub constraint_type: ConstraintType,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveredPartition {
    pub name: String,
    /// Raw partition bound expression
    pub partition_bound: String,
}

fn field(row: &RowView, index: usize) -> String {
    row.values.get(index).cloned().flatten().unwrap_or_default()
}

fn field_or(row: &RowView, index: usize, fallback: &str) -> String {
    row.values
        .get(index)
        .cloned()
        .flatten()
        .unwrap_or_else(|| fallback.to_string())
}

fn bool_field(row: &RowView, index: usize) -> bool {
    field_or(row, index, "f") == "t"
}

fn int_field(row: &RowView, index: usize, fallback: i32) -> i32 {
    field(row, index).parse().unwrap_or(fallback)
}

/// Catalog-query-driven schema reader
pub struct SchemaDiscovery<'a> {
    conn: &'a mut LoggedConnection,
}

impl<'a> SchemaDiscovery<'a> {
    pub fn new(conn: &'a mut LoggedConnection) -> Self {
        Self { conn }
    }

    /// All top-level tables in the public schema (partition children are
    /// reached through their parent)
    pub fn discover_tables(&mut self) -> SqlResult<Vec<DiscoveredTable>> {
        let query = r#"
        SELECT
          c.relname as table_name,
          c.relkind as table_type,
          COALESCE(am.amname, 'heap') as access_method,
          COALESCE(ts.spcname, 'pg_default') as tablespace,
          c.relpartbound IS NOT NULL as is_partition,
          CASE WHEN c.relkind = 'p' THEN 'RANGE' ELSE '' END as partition_type
        FROM pg_class c
        LEFT JOIN pg_am am ON c.relam = am.oid
        LEFT JOIN pg_tablespace ts ON c.reltablespace = ts.oid
        WHERE c.relkind IN ('r', 'p')
          AND c.relnamespace = (SELECT oid FROM pg_namespace WHERE nspname = 'public')
          AND NOT c.relispartition
        ORDER BY c.relname
    "#;

        let result = self.conn.execute(query).check()?;
        let mut tables = Vec::new();

        if let Some(mut rows) = result.rows {
            while let Some(row) = rows.next_row() {
                tables.push(DiscoveredTable {
                    name: field(&row, 0),
                    table_type: parse_table_type(&field(&row, 1)),
                    access_method: field_or(&row, 2, "heap"),
                    tablespace: parse_tablespace(&field_or(&row, 3, "pg_default")),
                    is_partition: bool_field(&row, 4),
                    partition_type: parse_partition_type(&field(&row, 5)),
                });
            }
        }

        debug!("Discovered {} tables", tables.len());
        Ok(tables)
    }

    /// Columns of one table, in ordinal order
    pub fn discover_columns(&mut self, table_name: &str) -> SqlResult<Vec<DiscoveredColumn>> {
        let query = format!(
            r#"
        SELECT
          a.attname as column_name,
          t.typname as data_type,
          a.attlen as length,
          a.atttypmod as type_modifier,
          a.attnotnull as not_null,
          a.attnum as ordinal_position,
          CASE WHEN pg_get_expr(ad.adbin, ad.adrelid) LIKE 'nextval%' THEN true ELSE false END as is_serial,
          CASE WHEN a.attgenerated = 's' THEN 'stored'
               WHEN a.attgenerated = 'v' THEN 'virtual'
               ELSE 'not_generated' END as generated_type,
          COALESCE(pg_get_expr(ad.adbin, ad.adrelid), '') as default_value
        FROM pg_attribute a
        JOIN pg_type t ON a.atttypid = t.oid
        LEFT JOIN pg_attrdef ad ON a.attrelid = ad.adrelid AND a.attnum = ad.adnum
        WHERE a.attrelid = (
            SELECT c.oid FROM pg_class c
            JOIN pg_namespace n ON c.relnamespace = n.oid
            WHERE c.relname = '{}' AND n.nspname = 'public'
        )
          AND a.attnum > 0
          AND NOT a.attisdropped
        ORDER BY a.attnum
    "#,
            table_name
        );

        let result = self.conn.execute(&query).check()?;
        let mut columns = Vec::new();

        if let Some(mut rows) = result.rows {
            while let Some(row) = rows.next_row() {
                let type_name = field(&row, 1);
                let data_type = ColumnType::from_backend_name(&type_name);
                let type_modifier = int_field(&row, 3, -1);

                let length = match data_type {
                    ColumnType::Varchar | ColumnType::Char => {
                        parse_type_modifier(&type_name, type_modifier)
                    }
                    _ => 0,
                };

                columns.push(DiscoveredColumn {
                    name: field(&row, 0),
                    data_type,
                    length,
                    type_modifier,
                    not_null: bool_field(&row, 4),
                    ordinal_position: int_field(&row, 5, 0),
                    is_serial: bool_field(&row, 6),
                    generated: parse_generated(&field_or(&row, 7, "not_generated")),
                    default_value: field(&row, 8),
                });
            }
        }

        debug!("Discovered {} columns for table {}", columns.len(), table_name);
        Ok(columns)
    }

    /// Secondary (non-primary) indexes of one table
    pub fn discover_indexes(&mut self, table_name: &str) -> SqlResult<Vec<DiscoveredIndex>> {
        let query = format!(
            r#"
        SELECT
          i.relname as index_name,
          ix.indisunique as is_unique,
          a.attname as column_name,
          array_position(ix.indkey, a.attnum) as key_position,
          pg_get_indexdef(ix.indexrelid) as index_def
        FROM pg_index ix
        JOIN pg_class i ON ix.indexrelid = i.oid
        JOIN pg_class t ON ix.indrelid = t.oid
        JOIN pg_attribute a ON t.oid = a.attrelid AND a.attnum = ANY(ix.indkey)
        JOIN pg_namespace n ON t.relnamespace = n.oid
        WHERE t.relname = '{}'
          AND n.nspname = 'public'
          AND NOT ix.indisprimary
        ORDER BY i.relname, array_position(ix.indkey, a.attnum)
    "#,
            table_name
        );

        let result = self.conn.execute(&query).check()?;
        let mut index_map: BTreeMap<String, DiscoveredIndex> = BTreeMap::new();

        if let Some(mut rows) = result.rows {
            while let Some(row) = rows.next_row() {
                let index_name = field(&row, 0);
                let is_unique = bool_field(&row, 1);
                let column_name = field(&row, 2);
                let index_def = field(&row, 4);

                // DESC only shows up in the index definition text
                let ordering = if index_def.contains(&format!("{} DESC", column_name)) {
                    IndexOrdering::Desc
                } else {
                    IndexOrdering::Asc
                };

                let entry = index_map
                    .entry(index_name.clone())
                    .or_insert_with(|| DiscoveredIndex {
                        name: index_name,
                        is_unique,
                        ..DiscoveredIndex::default()
                    });
                entry.column_names.push(column_name);
                entry.orderings.push(ordering);
            }
        }

        let indexes: Vec<DiscoveredIndex> = index_map.into_values().collect();
        debug!("Discovered {} indexes for table {}", indexes.len(), table_name);
        Ok(indexes)
    }

    /// Primary key, foreign key, unique and check constraints of one table
    pub fn discover_constraints(
        &mut self,
        table_name: &str,
    ) -> SqlResult<Vec<DiscoveredConstraint>> {
        let query = format!(
            r#"
        SELECT
          c.conname as constraint_name,
          c.contype as constraint_type,
          array_to_string(array(
            SELECT a.attname
            FROM pg_attribute a
            WHERE a.attrelid = c.conrelid
              AND a.attnum = ANY(c.conkey)
            ORDER BY array_position(c.conkey, a.attnum)
          ), ',') as column_names,
          COALESCE(
            CASE
              WHEN ft.relispartition = true THEN parent_ft.relname
              ELSE ft.relname
            END,
            ''
          ) as referenced_table,
          COALESCE(array_to_string(array(
            SELECT fa.attname
            FROM pg_attribute fa
            WHERE fa.attrelid = c.confrelid
              AND fa.attnum = ANY(c.confkey)
            ORDER BY array_position(c.confkey, fa.attnum)
          ), ','), '') as referenced_columns
        FROM pg_constraint c
        JOIN pg_class t ON c.conrelid = t.oid
        LEFT JOIN pg_class ft ON c.confrelid = ft.oid
        LEFT JOIN pg_inherits inh ON ft.oid = inh.inhrelid AND ft.relispartition = true
        LEFT JOIN pg_class parent_ft ON inh.inhparent = parent_ft.oid
        JOIN pg_namespace n ON t.relnamespace = n.oid
        WHERE t.relname = '{}'
          AND n.nspname = 'public'
          AND c.contype IN ('p', 'u', 'c', 'f')
        ORDER BY c.conname
    "#,
            table_name
        );

        let result = self.conn.execute(&query).check()?;
        let mut constraints = Vec::new();

        if let Some(mut rows) = result.rows {
            while let Some(row) = rows.next_row() {
                constraints.push(DiscoveredConstraint {
                    name: field(&row, 0),
                    constraint_type: parse_constraint_type(&field(&row, 1)),
                    columns: split_list(&field(&row, 2)),
                    referenced_table: field(&row, 3),
                    referenced_columns: split_list(&field(&row, 4)),
                });
            }
        }

        debug!(
            "Discovered {} constraints for table {}",
            constraints.len(),
            table_name
        );
        Ok(constraints)
    }

    /// Child partitions of one partitioned table
    pub fn discover_partitions(
        &mut self,
        table_name: &str,
    ) -> SqlResult<Vec<DiscoveredPartition>> {
        let query = format!(
            r#"
        SELECT
          child.relname as partition_name,
          pg_get_expr(child.relpartbound, child.oid) as partition_bound
        FROM pg_class parent
        JOIN pg_namespace parent_ns ON parent.relnamespace = parent_ns.oid
        JOIN pg_inherits inh ON parent.oid = inh.inhparent
        JOIN pg_class child ON inh.inhrelid = child.oid
        JOIN pg_namespace child_ns ON child.relnamespace = child_ns.oid
        WHERE parent.relname = '{}'
          AND parent_ns.nspname = 'public'
          AND child_ns.nspname = 'public'
          AND child.relispartition = true
        ORDER BY child.relname
    "#,
            table_name
        );

        let result = self.conn.execute(&query).check()?;
        let mut partitions = Vec::new();

        if let Some(mut rows) = result.rows {
            while let Some(row) = rows.next_row() {
                partitions.push(DiscoveredPartition {
                    name: field(&row, 0),
                    partition_bound: field(&row, 1),
                });
            }
        }

        debug!(
            "Discovered {} partitions for table {}",
            partitions.len(),
            table_name
        );
        Ok(partitions)
    }

    /// Partition key column names of one partitioned table
    pub fn discover_partition_keys(&mut self, table_name: &str) -> SqlResult<Vec<String>> {
        let query = format!(
            r#"
        SELECT a.attname as column_name
        FROM pg_class c
        JOIN pg_namespace n ON c.relnamespace = n.oid
        JOIN pg_partitioned_table pt ON c.oid = pt.partrelid
        JOIN pg_attribute a ON c.oid = a.attrelid
        WHERE c.relname = '{}'
          AND n.nspname = 'public'
          AND a.attnum = ANY(pt.partattrs)
        ORDER BY array_position(pt.partattrs, a.attnum)
    "#,
            table_name
        );

        let result = self.conn.execute(&query).check()?;
        let mut partition_keys = Vec::new();

        if let Some(mut rows) = result.rows {
            while let Some(row) = rows.next_row() {
                let column_name = field(&row, 0);
                if !column_name.is_empty() {
                    partition_keys.push(column_name);
                }
            }
        }

        debug!(
            "Discovered {} partition key columns for table {}",
            partition_keys.len(),
            table_name
        );
        Ok(partition_keys)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter(|item| !item.is_empty())
        .map(|item| item.to_string())
        .collect()
}

fn parse_tablespace(ts_name: &str) -> String {
    if ts_name == "pg_default" {
        String::new()
    } else {
        ts_name.to_string()
    }
}

/// PostgreSQL stores length + 4 in the type modifier of char types
fn parse_type_modifier(type_name: &str, type_modifier: i32) -> usize {
    if (type_name == "varchar" || type_name == "bpchar") && type_modifier >= 4 {
        (type_modifier - 4) as usize
    } else {
        0
    }
}

fn parse_table_type(type_char: &str) -> TableType {
    match type_char {
        "p" => TableType::Partitioned,
        _ => TableType::Normal,
    }
}

fn parse_partition_type(partition_type: &str) -> PartitionType {
    match partition_type {
        "RANGE" => PartitionType::Range,
        "HASH" => PartitionType::Hash,
        "LIST" => PartitionType::List,
        _ => PartitionType::None,
    }
}

fn parse_generated(generated: &str) -> Generated {
    match generated {
        "stored" => Generated::Stored,
        "virtual" => Generated::Virtual,
        _ => Generated::NotGenerated,
    }
}

fn parse_constraint_type(type_char: &str) -> ConstraintType {
    match type_char {
        "p" => ConstraintType::PrimaryKey,
        "f" => ConstraintType::ForeignKey,
        "u" => ConstraintType::Unique,
        "c" => ConstraintType::Check,
        _ => ConstraintType::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::mock::MockDriver;

    fn conn_with(driver: &MockDriver) -> LoggedConnection {
        LoggedConnection::new(Box::new(driver.clone()), "discovery-test")
    }

    fn s(value: &str) -> Option<String> {
        Some(value.to_string())
    }

    #[test]
    fn test_discover_tables_parses_rows() {
        let driver = MockDriver::new();
        driver.push_rows(vec![
            vec![s("foo1"), s("r"), s("heap"), s("pg_default"), s("f"), s("")],
            vec![
                s("foo2"),
                s("p"),
                s("heap"),
                s("my_space"),
                s("f"),
                s("RANGE"),
            ],
        ]);
        let mut conn = conn_with(&driver);

        let mut discovery = SchemaDiscovery::new(&mut conn);
        let tables = discovery.discover_tables().unwrap();

        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "foo1");
        assert_eq!(tables[0].table_type, TableType::Normal);
        assert_eq!(tables[0].tablespace, "");
        assert_eq!(tables[1].table_type, TableType::Partitioned);
        assert_eq!(tables[1].partition_type, PartitionType::Range);
        assert_eq!(tables[1].tablespace, "my_space");
    }

    #[test]
    fn test_discover_columns_maps_types_and_lengths() {
        let driver = MockDriver::new();
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
                s("104"),
                s("f"),
                s("2"),
                s("f"),
                s("not_generated"),
                s(""),
            ],
            vec![
                s("doubled"),
                s("int4"),
                s("4"),
                s("-1"),
                s("f"),
                s("3"),
                s("f"),
                s("stored"),
                s("(id * 2)"),
            ],
        ]);
        let mut conn = conn_with(&driver);

        let mut discovery = SchemaDiscovery::new(&mut conn);
        let columns = discovery.discover_columns("foo1").unwrap();

        assert_eq!(columns.len(), 3);

        assert_eq!(columns[0].name, "id");
        assert_eq!(columns[0].data_type, ColumnType::Int);
        assert!(columns[0].not_null);
        assert!(columns[0].is_serial);

        assert_eq!(columns[1].data_type, ColumnType::Varchar);
        assert_eq!(columns[1].length, 100);
        assert!(!columns[1].not_null);

        assert_eq!(columns[2].generated, Generated::Stored);
        assert_eq!(columns[2].default_value, "(id * 2)");
    }

    #[test]
    fn test_discover_indexes_groups_and_orders() {
        let driver = MockDriver::new();
        driver.push_rows(vec![
            vec![
                s("idx1"),
                s("t"),
                s("a"),
                s("1"),
                s("CREATE UNIQUE INDEX idx1 ON foo1 (a, b DESC)"),
            ],
            vec![
                s("idx1"),
                s("t"),
                s("b"),
                s("2"),
                s("CREATE UNIQUE INDEX idx1 ON foo1 (a, b DESC)"),
            ],
            vec![
                s("idx2"),
                s("f"),
                s("c"),
                s("1"),
                s("CREATE INDEX idx2 ON foo1 (c)"),
            ],
        ]);
        let mut conn = conn_with(&driver);

        let mut discovery = SchemaDiscovery::new(&mut conn);
        let indexes = discovery.discover_indexes("foo1").unwrap();

        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].name, "idx1");
        assert!(indexes[0].is_unique);
        assert_eq!(indexes[0].column_names, vec!["a", "b"]);
        assert_eq!(
            indexes[0].orderings,
            vec![IndexOrdering::Asc, IndexOrdering::Desc]
        );
        assert_eq!(indexes[1].name, "idx2");
        assert!(!indexes[1].is_unique);
    }

    #[test]
    fn test_discover_constraints_splits_column_lists() {
        let driver = MockDriver::new();
        driver.push_rows(vec![
            vec![s("foo1_pkey"), s("p"), s("id"), s(""), s("")],
            vec![s("foo1_fk"), s("f"), s("other_id"), s("other"), s("id")],
        ]);
        let mut conn = conn_with(&driver);

        let mut discovery = SchemaDiscovery::new(&mut conn);
        let constraints = discovery.discover_constraints("foo1").unwrap();

        assert_eq!(constraints.len(), 2);
        assert_eq!(constraints[0].constraint_type, ConstraintType::PrimaryKey);
        assert_eq!(constraints[0].columns, vec!["id"]);
        assert_eq!(constraints[1].constraint_type, ConstraintType::ForeignKey);
        assert_eq!(constraints[1].referenced_table, "other");
        assert_eq!(constraints[1].referenced_columns, vec!["id"]);
    }

    #[test]
    fn test_discover_failure_propagates_sql_error() {
        let driver = MockDriver::new();
        driver.push_error("42501", "permission denied", crate::sql::SqlStatus::Error);
        let mut conn = conn_with(&driver);

        let mut discovery = SchemaDiscovery::new(&mut conn);
        let err = discovery.discover_tables().unwrap_err();
        assert_eq!(err.code, "42501");
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_type_modifier("varchar", 104), 100);
        assert_eq!(parse_type_modifier("bpchar", 14), 10);
        assert_eq!(parse_type_modifier("int4", 104), 0);
        assert_eq!(parse_type_modifier("varchar", -1), 0);

        assert_eq!(parse_tablespace("pg_default"), "");
        assert_eq!(parse_tablespace("fast_ssd"), "fast_ssd");

        assert_eq!(parse_constraint_type("p"), ConstraintType::PrimaryKey);
        assert_eq!(parse_constraint_type("x"), ConstraintType::Unknown);

        assert_eq!(parse_generated("stored"), Generated::Stored);
        assert_eq!(parse_generated("virtual"), Generated::Virtual);
        assert_eq!(parse_generated("anything"), Generated::NotGenerated);
    }
}

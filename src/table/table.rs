//! Table structure for storing schema metadata

use crate::table::{Column, Index, RangePartitioning};
use std::fmt;

/// Table kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableType {
    /// Plain heap table
    #[default]
    Normal,
    /// Range-partitioned parent table
    Partitioned,
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableType::Normal => write!(f, "normal"),
            TableType::Partitioned => write!(f, "partitioned"),
        }
    }
}

/// Table metadata
///
/// Columns and indexes are kept in creation order, but equality is
/// order-independent over both: two tables are equal when their column
/// multisets and index multisets match. Field order *within* an index is
/// still significant (see [`Index`]).
#[derive(Debug, Clone, Default)]
pub struct Table {
    /// Table name
    pub name: String,
    /// Access method (heap, tde_heap, ...)
    pub engine: String,
    /// Tablespace, empty for the default
    pub tablespace: String,
    /// Range partitioning, if the table is partitioned
    pub partitioning: Option<RangePartitioning>,
    /// Table kind
    pub table_type: TableType,
    /// Columns in creation order
    pub columns: Vec<Column>,
    /// Indexes in creation order
    pub indexes: Vec<Index>,
}

impl Table {
    /// Create an empty table with a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// True when any column references `table_name`
    pub fn has_reference_to(&self, table_name: &str) -> bool {
        self.columns
            .iter()
            .any(|c| c.foreign_key_references == table_name)
    }

    /// Rewrite foreign key references from `old_name` to `new_name`
    pub fn update_references_to(&mut self, old_name: &str, new_name: &str) {
        for column in &mut self.columns {
            if column.foreign_key_references == old_name {
                column.foreign_key_references = new_name.to_string();
            }
        }
    }

    /// Clear foreign key references to `table_name`
    pub fn remove_references_to(&mut self, table_name: &str) {
        self.update_references_to(table_name, "");
    }

    /// Name of the partition child table for a given rangebase
    pub fn partition_name(&self, rangebase: u64) -> String {
        format!("{}_p{}", self.name, rangebase)
    }

    /// Multi-line human-readable rendering, used by catalog dumps
    pub fn dump(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Table: {}", self.name));
        lines.push(format!("  Engine: {}", self.engine));
        if !self.tablespace.is_empty() {
            lines.push(format!("  Tablespace: {}", self.tablespace));
        }

        if let Some(partitioning) = &self.partitioning {
            lines.push(format!(
                "  Partitioning: range (size={}, {} ranges)",
                partitioning.range_size,
                partitioning.ranges.len()
            ));
            for range in &partitioning.ranges {
                lines.push(format!("    Range: base={}", range.rangebase));
            }
        }

        lines.push(format!("  Columns ({}):", self.columns.len()));
        for col in &self.columns {
            lines.push(format!("    {}", col));
        }

        if !self.indexes.is_empty() {
            lines.push(format!("  Indexes ({}):", self.indexes.len()));
            for idx in &self.indexes {
                lines.push(format!("    {}", idx));
            }
        }

        lines.join("\n")
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name
            || self.engine != other.engine
            || self.tablespace != other.tablespace
            || self.partitioning != other.partitioning
            || self.columns.len() != other.columns.len()
            || self.indexes.len() != other.indexes.len()
        {
            return false;
        }

        self.columns
            .iter()
            .all(|column| other.columns.contains(column))
            && self.indexes.iter().all(|index| other.indexes.contains(index))
    }
}

impl Eq for Table {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::IndexColumn;
    use crate::types::{ColumnType, IndexOrdering};

    fn pk_column() -> Column {
        let mut col = Column::new("id", ColumnType::Int);
        col.primary_key = true;
        col
    }

    fn name_column() -> Column {
        let mut col = Column::new("name", ColumnType::Varchar);
        col.length = 100;
        col
    }

    #[test]
    fn test_table_equality_ignores_column_order() {
        let mut t1 = Table::new("test_table");
        t1.engine = "heap".to_string();
        t1.columns = vec![pk_column(), name_column()];

        let mut t2 = Table::new("test_table");
        t2.engine = "heap".to_string();
        t2.columns = vec![name_column(), pk_column()];

        assert_eq!(t1, t2);
    }

    #[test]
    fn test_table_equality_ignores_index_order() {
        let mut idx_name = Index::new("idx_name", false);
        idx_name
            .fields
            .push(IndexColumn::new("name", IndexOrdering::Asc));

        let mut idx_id = Index::new("idx_id", true);
        idx_id
            .fields
            .push(IndexColumn::new("id", IndexOrdering::Desc));

        let mut t1 = Table::new("test_table");
        t1.columns = vec![pk_column(), name_column()];
        t1.indexes = vec![idx_name.clone(), idx_id.clone()];

        let mut t2 = Table::new("test_table");
        t2.columns = vec![pk_column(), name_column()];
        t2.indexes = vec![idx_id, idx_name];

        assert_eq!(t1, t2);
    }

    #[test]
    fn test_table_inequality_on_differing_columns() {
        let mut t1 = Table::new("test_table");
        t1.columns = vec![pk_column()];

        let mut t2 = Table::new("test_table");
        t2.columns = vec![name_column()];

        assert_ne!(t1, t2);

        let mut t3 = Table::new("other_table");
        t3.columns = vec![pk_column()];
        assert_ne!(t1, t3);
    }

    #[test]
    fn test_reference_helpers() {
        let mut table = Table::new("orders");
        let mut fk = Column::new("customer_id", ColumnType::Int);
        fk.foreign_key_references = "customers".to_string();
        table.columns = vec![pk_column(), fk];

        assert!(table.has_reference_to("customers"));
        assert!(!table.has_reference_to("products"));

        table.update_references_to("customers", "clients");
        assert!(table.has_reference_to("clients"));

        table.remove_references_to("clients");
        assert!(!table.has_reference_to("clients"));
        assert!(!table.columns[1].is_foreign_key());
    }

    #[test]
    fn test_partition_name() {
        let table = Table::new("foo123");
        assert_eq!(table.partition_name(2), "foo123_p2");
    }

    #[test]
    fn test_dump_contains_schema() {
        let mut table = Table::new("debug_test_table");
        table.engine = "heap".to_string();

        let mut col = Column::new("id", ColumnType::Int);
        col.primary_key = true;
        col.auto_increment = true;
        table.columns.push(col);

        let mut idx = Index::new("test_idx", true);
        idx.fields.push(IndexColumn::new("id", IndexOrdering::Asc));
        table.indexes.push(idx);

        let dump = table.dump();
        assert!(dump.contains("debug_test_table"));
        assert!(dump.contains("id INT"));
        assert!(dump.contains("test_idx UNIQUE"));
    }
}

//! Column structure for table schema definition

use crate::types::{ColumnType, Generated};
use std::fmt;

/// Column metadata
///
/// Equality is field-wise. `foreign_key_references` holds the name of the
/// referenced table, empty when the column is not a foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Column data type
    pub col_type: ColumnType,
    /// Length for CHAR/VARCHAR, 0 otherwise
    pub length: usize,
    /// Whether NULL values are allowed
    pub nullable: bool,
    /// Part of the primary key
    pub primary_key: bool,
    /// Server-generated integer sequence (SERIAL)
    pub auto_increment: bool,
    /// Part of the partition key
    pub partition_key: bool,
    /// Referenced table name, empty if none
    pub foreign_key_references: String,
    /// Default value expression
    pub default_value: String,
    /// Generated-column kind
    pub generated: Generated,
}

impl Default for Column {
    fn default() -> Self {
        Self {
            name: String::new(),
            col_type: ColumnType::Int,
            length: 0,
            nullable: true,
            primary_key: false,
            auto_increment: false,
            partition_key: false,
            foreign_key_references: String::new(),
            default_value: String::new(),
            generated: Generated::NotGenerated,
        }
    }
}

impl Column {
    /// Create a column with just a name and type
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            col_type,
            ..Self::default()
        }
    }

    /// True when this column references another table
    pub fn is_foreign_key(&self) -> bool {
        !self.foreign_key_references.is_empty()
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.col_type)?;
        if self.length > 0 {
            write!(f, "({})", self.length)?;
        }
        if self.primary_key {
            write!(f, " PRIMARY KEY")?;
        }
        if self.auto_increment {
            write!(f, " AUTO_INCREMENT")?;
        }
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        if self.partition_key {
            write!(f, " PARTITION KEY")?;
        }
        if self.is_foreign_key() {
            write!(f, " REFERENCES {}", self.foreign_key_references)?;
        }
        if !self.default_value.is_empty() {
            write!(f, " DEFAULT '{}'", self.default_value)?;
        }
        match self.generated {
            Generated::NotGenerated => {}
            Generated::Stored => write!(f, " GENERATED STORED")?,
            Generated::Virtual => write!(f, " GENERATED VIRTUAL")?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_equality_is_fieldwise() {
        let mut a = Column::new("id", ColumnType::Int);
        let mut b = Column::new("id", ColumnType::Int);
        assert_eq!(a, b);

        a.primary_key = true;
        assert_ne!(a, b);

        b.primary_key = true;
        assert_eq!(a, b);

        a.foreign_key_references = "other".to_string();
        assert_ne!(a, b);
    }

    #[test]
    fn test_column_display() {
        let mut col = Column::new("id", ColumnType::Int);
        col.primary_key = true;
        col.auto_increment = true;
        col.nullable = false;
        assert_eq!(col.to_string(), "id INT PRIMARY KEY AUTO_INCREMENT NOT NULL");

        let mut name = Column::new("name", ColumnType::Varchar);
        name.length = 100;
        assert_eq!(name.to_string(), "name VARCHAR(100)");
    }
}

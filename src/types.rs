//! Global type definitions
//!
//! Enums shared by the table model, the action engine and schema discovery.

use std::fmt;

/// Column data types supported by the workload generator
///
/// Mirrors the PostgreSQL types the DDL actions emit. CHAR and VARCHAR
/// carry a length on the owning column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Real,
    Char,
    Varchar,
    Text,
    Bytea,
    Bool,
}

impl ColumnType {
    /// All types, used for random column generation
    pub const ALL: [ColumnType; 7] = [
        ColumnType::Int,
        ColumnType::Real,
        ColumnType::Char,
        ColumnType::Varchar,
        ColumnType::Text,
        ColumnType::Bytea,
        ColumnType::Bool,
    ];

    /// SQL spelling used in generated statements
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Int => "INT",
            ColumnType::Real => "REAL",
            ColumnType::Char => "CHAR",
            ColumnType::Varchar => "VARCHAR",
            ColumnType::Text => "TEXT",
            ColumnType::Bytea => "BYTEA",
            ColumnType::Bool => "BOOL",
        }
    }

    /// Map a backend catalog type name to a column type
    ///
    /// Unknown names (timestamps, dates, ...) fall back to TEXT.
    pub fn from_backend_name(name: &str) -> ColumnType {
        match name {
            "int2" | "int4" | "int8" => ColumnType::Int,
            "varchar" => ColumnType::Varchar,
            "bpchar" => ColumnType::Char,
            "text" => ColumnType::Text,
            "float4" | "float8" => ColumnType::Real,
            "bool" => ColumnType::Bool,
            "bytea" => ColumnType::Bytea,
            _ => ColumnType::Text,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_name())
    }
}

impl Default for ColumnType {
    /// TEXT, the discovery fallback for unknown backend types
    fn default() -> Self {
        ColumnType::Text
    }
}

/// Generated-column kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Generated {
    #[default]
    NotGenerated,
    Stored,
    Virtual,
}

/// Ordering of a single index field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexOrdering {
    #[default]
    Default,
    Asc,
    Desc,
}

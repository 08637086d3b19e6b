//! Per-table content checksums
//!
//! Hashes every row of every catalog table in a deterministic order so two
//! runs (or a primary and a restored backup) can be compared by their CSV
//! output alone.

use crate::metadata::Metadata;
use crate::sql::{LoggedConnection, SqlError};
use sha2::{Digest, Sha256};
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;

/// Checksum failures
#[derive(Debug)]
pub enum ChecksumError {
    Sql(SqlError),
    /// COUNT(*) returned no usable value
    MissingRowCount(String),
    Io(std::io::Error),
}

impl fmt::Display for ChecksumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumError::Sql(err) => write!(f, "SQL error: {}", err),
            ChecksumError::MissingRowCount(table) => {
                write!(f, "Failed to get row count for table: {}", table)
            }
            ChecksumError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl Error for ChecksumError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ChecksumError::Sql(err) => Some(err),
            ChecksumError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SqlError> for ChecksumError {
    fn from(err: SqlError) -> Self {
        ChecksumError::Sql(err)
    }
}

impl From<std::io::Error> for ChecksumError {
    fn from(err: std::io::Error) -> Self {
        ChecksumError::Io(err)
    }
}


/// Checksum of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumResult {
    pub table_name: String,
    pub checksum: String,
    pub row_count: u64,
}

/// Calculates SHA-256 checksums over the content of all catalog tables
pub struct DatabaseChecksum<'a> {
    conn: &'a mut LoggedConnection,
    metadata: &'a Metadata,
    results: Vec<ChecksumResult>,
}

impl<'a> DatabaseChecksum<'a> {
    pub fn new(conn: &'a mut LoggedConnection, metadata: &'a Metadata) -> Self {
        Self {
            conn,
            metadata,
            results: Vec::new(),
        }
    }

    /// Hash every table currently in the catalog, sorted by table name
    pub fn calculate_all_table_checksums(&mut self) -> Result<(), ChecksumError> {
        self.results.clear();

        for i in 0..self.metadata.size() {
            let table = match self.metadata.get(i) {
                Some(table) => table,
                None => continue,
            };

            let row_count: u64 = self
                .conn
                .query_single_value(&format!("SELECT COUNT(*) FROM {}", table.name))
                .and_then(|value| value.parse().ok())
                .ok_or_else(|| ChecksumError::MissingRowCount(table.name.clone()))?;

            let mut hasher = Sha256::new();
            self.process_all_rows(&table, &mut hasher)?;

            self.results.push(ChecksumResult {
                table_name: table.name.clone(),
                checksum: hex_digest(hasher),
                row_count,
            });
        }

        self.results.sort_by(|a, b| a.table_name.cmp(&b.table_name));
        Ok(())
    }

    /// CSV rendering: `table_name,checksum,row_count`
    pub fn results_as_string(&self) -> String {
        let mut output = String::from("table_name,checksum,row_count\n");
        for result in &self.results {
            output.push_str(&format!(
                "{},{},{}\n",
                result.table_name, result.checksum, result.row_count
            ));
        }
        output
    }

    pub fn write_results_to_file(&self, path: impl AsRef<Path>) -> Result<(), ChecksumError> {
        fs::write(path, self.results_as_string())?;
        Ok(())
    }

    pub fn results(&self) -> &[ChecksumResult] {
        &self.results
    }

    fn process_all_rows(
        &mut self,
        table: &crate::table::Table,
        hasher: &mut Sha256,
    ) -> Result<(), ChecksumError> {
        // order by every column so the row stream is stable
        let order_by = if table.columns.is_empty() {
            String::new()
        } else {
            let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
            format!("ORDER BY {}", names.join(", "))
        };

        let result = self
            .conn
            .execute(&format!("SELECT * FROM {} {}", table.name, order_by))
            .check()?;

        if let Some(mut rows) = result.rows {
            while let Some(row) = rows.next_row() {
                hasher.update(row_text(&row.values).as_bytes());
            }
        }

        Ok(())
    }
}

/// NULL renders as empty; every field is terminated with `|`
fn row_text(values: &[Option<String>]) -> String {
    let mut text = String::new();
    for value in values {
        if let Some(value) = value {
            text.push_str(value);
        }
        text.push('|');
    }
    text
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

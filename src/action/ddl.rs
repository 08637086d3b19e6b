//! DDL actions

use crate::action::{find_random_table, Action, ActionResult, TableCallback};
use crate::metadata::Metadata;
use crate::random::RandomSource;
use crate::sql::LoggedConnection;
use crate::table::{Column, Index, IndexColumn, RangePartition, RangePartitioning, TableType};
use crate::types::{ColumnType, IndexOrdering};
use bitflags::bitflags;
use std::sync::Arc;

/// Settings for the DDL actions
#[derive(Debug, Clone)]
pub struct DdlConfig {
    pub min_table_count: usize,
    pub max_table_count: usize,
    pub max_column_count: usize,
    pub max_alter_clauses: usize,
    pub min_partition_count: usize,
    pub max_partition_count: usize,
    pub access_methods: Vec<String>,
    /// Chance (0-100) that a new table's second column references an
    /// existing table
    pub ct_foreign_key_percentage: u64,
}

impl Default for DdlConfig {
    fn default() -> Self {
        Self {
            min_table_count: 3,
            max_table_count: 20,
            max_column_count: 20,
            max_alter_clauses: 5,
            min_partition_count: 3,
            max_partition_count: 10,
            access_methods: vec!["heap".to_string(), "tde_heap".to_string()],
            ct_foreign_key_percentage: 20,
        }
    }
}

bitflags! {
    /// Subcommands AlterTable may combine into one statement
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AlterCommands: u8 {
        const ADD_COLUMN = 1 << 0;
        const DROP_COLUMN = 1 << 1;
        const CHANGE_COLUMN = 1 << 2;
        const CHANGE_ACCESS_METHOD = 1 << 3;
    }
}

fn random_column_type(rand: &mut RandomSource) -> ColumnType {
    ColumnType::ALL[rand.random_number(0usize, ColumnType::ALL.len() - 1)]
}

fn random_column_length(rand: &mut RandomSource, col_type: ColumnType) -> usize {
    match col_type {
        ColumnType::Char | ColumnType::Varchar => rand.random_number(1usize, 100),
        _ => 0,
    }
}

fn random_column(rand: &mut RandomSource, force_pk: bool) -> Column {
    let mut col = Column::new(
        format!("col{}", rand.random_number(1u64, 100_000_000)),
        ColumnType::Int,
    );

    if force_pk {
        col.primary_key = true;
        col.nullable = false;
    } else {
        col.col_type = random_column_type(rand);
        col.length = random_column_length(rand, col.col_type);
    }

    col
}

fn column_definition(col: &Column) -> String {
    if col.auto_increment {
        return format!("{} SERIAL", col.name);
    }

    let mut def = format!("{} {}", col.name, col.col_type.sql_name());
    if col.length > 0 {
        def.push_str(&format!("({})", col.length));
    }
    if col.is_foreign_key() {
        def.push_str(&format!(
            " REFERENCES {} ON DELETE CASCADE",
            col.foreign_key_references
        ));
    }
    def
}

/// Create a new randomly shaped table
///
/// The first column is always an INT primary key: serial for normal
/// tables, the partition key for partitioned ones. Partitioned tables get
/// their range partitions created as child tables right away.
pub struct CreateTable {
    config: DdlConfig,
    table_type: TableType,
    success_callback: Option<TableCallback>,
}

impl CreateTable {
    pub fn new(config: DdlConfig, table_type: TableType) -> Self {
        Self {
            config,
            table_type,
            success_callback: None,
        }
    }

    pub fn set_success_callback(&mut self, callback: TableCallback) {
        self.success_callback = Some(callback);
    }
}

impl Action for CreateTable {
    fn execute(
        &self,
        meta: &Metadata,
        rand: &mut RandomSource,
        conn: &mut LoggedConnection,
    ) -> ActionResult<()> {
        if meta.size() >= self.config.max_table_count {
            return Ok(());
        }

        let mut res = meta.reserve_create();
        if !res.open() {
            return Ok(());
        }

        let mut table = crate::table::Table::new(format!(
            "foo{}",
            rand.random_number(1u64, 100_000_000)
        ));
        table.table_type = self.table_type;

        let column_count = rand.random_number(2usize, self.config.max_column_count);
        for idx in 0..column_count {
            let mut col = random_column(rand, idx == 0);
            if idx == 0 {
                match self.table_type {
                    TableType::Normal => col.auto_increment = true,
                    TableType::Partitioned => col.partition_key = true,
                }
            }
            table.columns.push(col);
        }

        if rand.random_number(1u64, 100) <= self.config.ct_foreign_key_percentage {
            if let Ok(referenced) = find_random_table(meta, rand) {
                let col = &mut table.columns[1];
                col.col_type = ColumnType::Int;
                col.length = 0;
                col.foreign_key_references = referenced.name.clone();
            }
        }

        if self.table_type == TableType::Partitioned {
            let mut partitioning = RangePartitioning::default();
            let partition_count = rand.random_number(
                self.config.min_partition_count,
                self.config.max_partition_count,
            );
            for i in 0..partition_count {
                partitioning.ranges.push(RangePartition::new(i as u64));
            }
            table.partitioning = Some(partitioning);
        }

        let mut defs: Vec<String> = Vec::new();
        let mut pk_columns: Vec<String> = Vec::new();
        for col in &table.columns {
            if col.primary_key {
                pk_columns.push(col.name.clone());
            }
            defs.push(column_definition(col));
        }
        if !pk_columns.is_empty() {
            defs.push(format!("PRIMARY KEY ({})", pk_columns.join(", ")));
        }

        let mut sql = format!("CREATE TABLE {} ({})", table.name, defs.join(",\n"));
        if let Some(partitioning) = &table.partitioning {
            sql.push_str(&format!(" PARTITION BY RANGE ({})", table.columns[0].name));
            sql.push(';');
            conn.execute(&sql).check()?;

            for range in &partitioning.ranges {
                conn.execute(&format!(
                    "CREATE TABLE {} PARTITION OF {} FOR VALUES FROM ({}) TO ({});",
                    table.partition_name(range.rangebase),
                    table.name,
                    range.lower_bound(partitioning.range_size),
                    range.upper_bound(partitioning.range_size)
                ))
                .check()?;
            }
        } else {
            sql.push(';');
            conn.execute(&sql).check()?;
        }

        if let Some(callback) = &self.success_callback {
            callback(Arc::new(table.clone()));
        }

        if let Some(slot) = res.table_mut() {
            *slot = table;
        }
        res.complete()?;

        Ok(())
    }
}

/// Drop a random table, then clear foreign keys that pointed at it
pub struct DropTable {
    config: DdlConfig,
}

impl DropTable {
    pub fn new(config: DdlConfig) -> Self {
        Self { config }
    }
}

impl Action for DropTable {
    fn execute(
        &self,
        meta: &Metadata,
        rand: &mut RandomSource,
        conn: &mut LoggedConnection,
    ) -> ActionResult<()> {
        if meta.size() <= self.config.min_table_count {
            return Ok(());
        }

        let idx = rand.random_number(0usize, meta.size() - 1);
        let mut res = meta.reserve_drop(idx);
        if !res.open() {
            return Ok(());
        }

        let dropped = match res.table() {
            Some(table) => table.name.clone(),
            None => return Ok(()),
        };

        conn.execute(&format!("DROP TABLE {} CASCADE;", dropped))
            .check()?;
        res.complete()?;

        // best effort: racing workers may move or drop tables underneath us
        for i in 0..meta.size() {
            let table = match meta.get(i) {
                Some(table) => table,
                None => continue,
            };
            if !table.has_reference_to(&dropped) {
                continue;
            }
            let mut alter = meta.reserve_alter(i);
            if !alter.open() {
                continue;
            }
            if let Some(copy) = alter.table_mut() {
                copy.remove_references_to(&dropped);
            }
            alter.complete()?;
        }

        Ok(())
    }
}

/// Apply 1..max_alter_clauses random subcommands in one ALTER TABLE
pub struct AlterTable {
    config: DdlConfig,
    possible_commands: AlterCommands,
}

impl AlterTable {
    pub fn new(config: DdlConfig, possible_commands: AlterCommands) -> Self {
        Self {
            config,
            possible_commands,
        }
    }
}

impl Action for AlterTable {
    fn execute(
        &self,
        meta: &Metadata,
        rand: &mut RandomSource,
        conn: &mut LoggedConnection,
    ) -> ActionResult<()> {
        if meta.size() == 0 {
            return Ok(());
        }

        let commands: Vec<AlterCommands> = self.possible_commands.iter().collect();
        if commands.is_empty() {
            return Ok(());
        }

        let idx = rand.random_number(0usize, meta.size() - 1);
        let mut res = meta.reserve_alter(idx);
        if !res.open() {
            return Ok(());
        }
        let table = match res.table_mut() {
            Some(table) => table,
            None => return Ok(()),
        };

        let how_many = rand.random_number(1usize, self.config.max_alter_clauses);

        let mut clauses: Vec<String> = Vec::new();
        // new columns can't be modified or dropped by the same statement,
        // and slot 0 (the serial primary key) is never dropped
        let mut available: Vec<usize> = (1..table.columns.len()).collect();
        let mut dropped: Vec<usize> = Vec::new();
        let mut new_columns: Vec<Column> = Vec::new();
        let mut changing_am = false;

        for _ in 0..how_many {
            let mut added = false;
            let mut attempts = 0;
            while !added && attempts < 10 {
                attempts += 1;
                let cmd = commands[rand.random_number(0usize, commands.len() - 1)];
                if cmd == AlterCommands::ADD_COLUMN {
                    let col = random_column(rand, false);
                    clauses.push(format!("ADD COLUMN {}", column_definition(&col)));
                    new_columns.push(col);
                    added = true;
                } else if cmd == AlterCommands::DROP_COLUMN {
                    if table.columns.len() - dropped.len() < 3 || available.is_empty() {
                        continue;
                    }
                    let pos = rand.random_number(0usize, available.len() - 1);
                    let column_index = available[pos];
                    clauses.push(format!("DROP COLUMN {}", table.columns[column_index].name));
                    dropped.push(column_index);
                    available.remove(pos);
                    added = true;
                } else if cmd == AlterCommands::CHANGE_COLUMN {
                    // numeric to string only, skipping key columns
                    for pos in 0..available.len() {
                        let col = &mut table.columns[available[pos]];
                        let numeric =
                            col.col_type == ColumnType::Int || col.col_type == ColumnType::Real;
                        if !numeric || col.primary_key || col.is_foreign_key() {
                            continue;
                        }
                        clauses.push(format!("ALTER COLUMN {} TYPE VARCHAR(32)", col.name));
                        col.col_type = ColumnType::Varchar;
                        col.length = 32;
                        available.remove(pos);
                        added = true;
                        break;
                    }
                } else if cmd == AlterCommands::CHANGE_ACCESS_METHOD {
                    if changing_am || self.config.access_methods.is_empty() {
                        continue;
                    }
                    let am_index =
                        rand.random_number(0usize, self.config.access_methods.len() - 1);
                    clauses.push(format!(
                        "SET ACCESS METHOD {}",
                        self.config.access_methods[am_index]
                    ));
                    changing_am = true;
                    added = true;
                }
            }
        }

        if clauses.is_empty() {
            // nothing applicable; the reservation cancels on drop
            return Ok(());
        }

        dropped.sort_unstable_by(|a, b| b.cmp(a));
        for column_index in dropped {
            table.columns.remove(column_index);
        }
        table.columns.append(&mut new_columns);

        let sql = format!("ALTER TABLE {} \n {};", table.name, clauses.join(",\n"));
        conn.execute(&sql).check()?;
        res.complete()?;

        Ok(())
    }
}

/// Rename a random table, then retarget foreign keys at the new name
pub struct RenameTable {
    #[allow(dead_code)]
    config: DdlConfig,
}

impl RenameTable {
    pub fn new(config: DdlConfig) -> Self {
        Self { config }
    }
}

impl Action for RenameTable {
    fn execute(
        &self,
        meta: &Metadata,
        rand: &mut RandomSource,
        conn: &mut LoggedConnection,
    ) -> ActionResult<()> {
        if meta.size() == 0 {
            return Ok(());
        }

        let idx = rand.random_number(0usize, meta.size() - 1);
        let mut res = meta.reserve_alter(idx);
        if !res.open() {
            return Ok(());
        }

        let (old_name, new_name) = match res.table_mut() {
            Some(table) => {
                let old_name = table.name.clone();
                table.name = format!("foo{}", rand.random_number(1u64, 1_000_000));
                (old_name, table.name.clone())
            }
            None => return Ok(()),
        };

        conn.execute(&format!("ALTER TABLE {} RENAME TO {};", old_name, new_name))
            .check()?;
        res.complete()?;

        // best effort reference fixup, same caveats as DropTable
        for i in 0..meta.size() {
            let table = match meta.get(i) {
                Some(table) => table,
                None => continue,
            };
            if !table.has_reference_to(&old_name) {
                continue;
            }
            let mut alter = meta.reserve_alter(i);
            if !alter.open() {
                continue;
            }
            if let Some(copy) = alter.table_mut() {
                copy.update_references_to(&old_name, &new_name);
            }
            alter.complete()?;
        }

        Ok(())
    }
}

/// Create a random multi-column index on a random table
pub struct CreateIndex {
    #[allow(dead_code)]
    config: DdlConfig,
}

impl CreateIndex {
    pub fn new(config: DdlConfig) -> Self {
        Self { config }
    }
}

impl Action for CreateIndex {
    fn execute(
        &self,
        meta: &Metadata,
        rand: &mut RandomSource,
        conn: &mut LoggedConnection,
    ) -> ActionResult<()> {
        if meta.size() == 0 {
            return Ok(());
        }

        let idx = rand.random_number(0usize, meta.size() - 1);
        let mut res = meta.reserve_alter(idx);
        if !res.open() {
            return Ok(());
        }
        let table = match res.table_mut() {
            Some(table) => table,
            None => return Ok(()),
        };
        if table.columns.is_empty() {
            return Ok(());
        }

        let mut index = Index::new(
            format!("idx{}", rand.random_number(1u64, 100_000_000)),
            rand.random_bool(),
        );

        let mut available: Vec<usize> = (0..table.columns.len()).collect();
        rand.shuffle(&mut available);
        let max_columns = available.len().saturating_sub(1).clamp(1, 32);
        let column_count = rand.random_number(1usize, max_columns);

        let mut index_columns: Vec<String> = Vec::new();
        for &col_idx in available.iter().take(column_count) {
            let column_name = table.columns[col_idx].name.clone();
            let ascending = rand.random_bool();
            index_columns.push(format!(
                "{} {}",
                column_name,
                if ascending { "ASC" } else { "DESC" }
            ));
            index.fields.push(IndexColumn::new(
                column_name,
                if ascending {
                    IndexOrdering::Asc
                } else {
                    IndexOrdering::Desc
                },
            ));
        }

        let unique = if index.unique { "UNIQUE" } else { "" };
        let concurrently = if rand.random_bool() { "CONCURRENTLY" } else { "" };
        let only = if rand.random_bool() { "ONLY" } else { "" };

        let sql = format!(
            "CREATE {} INDEX {} {} ON {} {} ({});",
            unique,
            concurrently,
            index.name,
            only,
            table.name,
            index_columns.join(", ")
        );
        table.indexes.push(index);

        conn.execute(&sql).check()?;
        res.complete()?;

        Ok(())
    }
}

/// Drop a random index from a table that has one
pub struct DropIndex {
    #[allow(dead_code)]
    config: DdlConfig,
}

impl DropIndex {
    pub fn new(config: DdlConfig) -> Self {
        Self { config }
    }
}

impl Action for DropIndex {
    fn execute(
        &self,
        meta: &Metadata,
        rand: &mut RandomSource,
        conn: &mut LoggedConnection,
    ) -> ActionResult<()> {
        for _ in 0..10 {
            let size = meta.size();
            if size == 0 {
                return Ok(());
            }

            let idx = rand.random_number(0usize, size - 1);
            let table = match meta.get(idx) {
                Some(table) => table,
                None => continue,
            };
            if table.indexes.is_empty() {
                continue;
            }

            let mut res = meta.reserve_alter(idx);
            if !res.open() {
                continue;
            }
            let copy = match res.table_mut() {
                Some(copy) => copy,
                None => continue,
            };
            if copy.indexes.is_empty() {
                continue;
            }

            let index_idx = rand.random_number(0usize, copy.indexes.len() - 1);
            let name = copy.indexes[index_idx].name.clone();

            conn.execute(&format!("DROP INDEX {};", name)).check()?;
            copy.indexes.remove(index_idx);
            res.complete()?;
            return Ok(());
        }

        Ok(())
    }
}

/// Add a range partition to a partitioned table below the configured cap
pub struct CreatePartition {
    config: DdlConfig,
}

impl CreatePartition {
    pub fn new(config: DdlConfig) -> Self {
        Self { config }
    }
}

impl Action for CreatePartition {
    fn execute(
        &self,
        meta: &Metadata,
        rand: &mut RandomSource,
        conn: &mut LoggedConnection,
    ) -> ActionResult<()> {
        for _ in 0..10 {
            let size = meta.size();
            if size == 0 {
                return Ok(());
            }

            let idx = rand.random_number(0usize, size - 1);
            let candidate = match meta.get(idx) {
                Some(table) => table,
                None => continue,
            };
            let ranges = match &candidate.partitioning {
                Some(partitioning) => partitioning.ranges.len(),
                None => continue,
            };
            if ranges >= self.config.max_partition_count {
                continue;
            }

            let mut res = meta.reserve_alter(idx);
            if !res.open() {
                continue;
            }
            let table = match res.table_mut() {
                Some(table) => table,
                None => continue,
            };

            // re-check on the locked copy
            let (base, range_size) = match table.partitioning.as_mut() {
                Some(partitioning) if partitioning.ranges.len() < self.config.max_partition_count => {
                    let base = partitioning.max_rangebase().map(|b| b + 1).unwrap_or(0);
                    partitioning.ranges.push(RangePartition::new(base));
                    (base, partitioning.range_size)
                }
                _ => continue,
            };

            let sql = format!(
                "CREATE TABLE {} PARTITION OF {} FOR VALUES FROM ({}) TO ({});",
                table.partition_name(base),
                table.name,
                base * range_size,
                (base + 1) * range_size
            );
            conn.execute(&sql).check()?;
            res.complete()?;
            return Ok(());
        }

        Ok(())
    }
}

/// Drop a random range partition, keeping at least the configured minimum
pub struct DropPartition {
    config: DdlConfig,
}

impl DropPartition {
    pub fn new(config: DdlConfig) -> Self {
        Self { config }
    }
}

impl Action for DropPartition {
    fn execute(
        &self,
        meta: &Metadata,
        rand: &mut RandomSource,
        conn: &mut LoggedConnection,
    ) -> ActionResult<()> {
        for _ in 0..10 {
            let size = meta.size();
            if size == 0 {
                return Ok(());
            }

            let idx = rand.random_number(0usize, size - 1);
            let candidate = match meta.get(idx) {
                Some(table) => table,
                None => continue,
            };
            let ranges = match &candidate.partitioning {
                Some(partitioning) => partitioning.ranges.len(),
                None => continue,
            };
            if ranges <= self.config.min_partition_count {
                continue;
            }

            let mut res = meta.reserve_alter(idx);
            if !res.open() {
                continue;
            }
            let table = match res.table_mut() {
                Some(table) => table,
                None => continue,
            };

            let base = match table.partitioning.as_mut() {
                Some(partitioning) if partitioning.ranges.len() > self.config.min_partition_count => {
                    let range_idx =
                        rand.random_number(0usize, partitioning.ranges.len() - 1);
                    partitioning.ranges.remove(range_idx).rangebase
                }
                _ => continue,
            };

            let sql = format!("DROP TABLE {};", table.partition_name(base));
            conn.execute(&sql).check()?;
            res.complete()?;
            return Ok(());
        }

        Ok(())
    }
}

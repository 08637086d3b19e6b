//! Concurrent metadata catalog
//!
//! A fixed-capacity slot array of tables shared by all workers. Slots are
//! guarded by per-slot reader-writer locks; the externally visible size and
//! the number of reserved-but-uncommitted slots are atomic counters.
//!
//! All mutation goes through the [`Reservation`] protocol:
//!
//! - CREATE reserves a slot count (no lock) and installs at the current end
//!   on complete.
//! - ALTER locks one slot and edits a private deep copy, published on
//!   complete.
//! - DROP locks one slot and compacts on complete by moving the last table
//!   into the hole.
//!
//! `table_count` is only ever modified by a thread holding the write lock of
//! the last occupied slot, which makes that lock the size gate: a CREATE
//! installing after the end and a DROP shrinking the end serialize on it
//! without any catalog-wide lock.

use crate::table::Table;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

mod error;

pub use error::{MetadataError, MetadataResult};

/// Capacity of the catalog
pub const MAX_TABLES: usize = 1024;

const NPOS: usize = usize::MAX;

/// Shared-ownership table handle handed out to readers
pub type TablePtr = Arc<Table>;

type Slot = RwLock<Option<TablePtr>>;

#[cfg(test)]
thread_local! {
    static DROP_VERIFY_PAUSE: std::cell::RefCell<Option<Box<dyn FnMut()>>> =
        std::cell::RefCell::new(None);
}

/// Install a callback invoked by DROP compaction on this thread right before
/// it locks the last slot, so tests can interleave racing mutations.
#[cfg(test)]
pub(crate) fn set_drop_verify_pause(hook: Option<Box<dyn FnMut()>>) {
    DROP_VERIFY_PAUSE.with(|cell| *cell.borrow_mut() = hook);
}

#[cfg(test)]
fn drop_verify_pause() {
    DROP_VERIFY_PAUSE.with(|cell| {
        if let Some(hook) = cell.borrow_mut().as_mut() {
            hook();
        }
    });
}

/// The shared catalog of tables
pub struct Metadata {
    tables: Vec<Slot>,
    moved_to: Vec<AtomicUsize>,
    table_count: AtomicUsize,
    reserved_size: AtomicUsize,
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

impl Metadata {
    pub fn new() -> Self {
        Self {
            tables: (0..MAX_TABLES).map(|_| RwLock::new(None)).collect(),
            moved_to: (0..MAX_TABLES).map(|_| AtomicUsize::new(NPOS)).collect(),
            table_count: AtomicUsize::new(0),
            reserved_size: AtomicUsize::new(0),
        }
    }

    /// Number of visible tables
    pub fn size(&self) -> usize {
        self.table_count.load(Ordering::SeqCst)
    }

    /// Clone the table pointer at `index`, if the slot is occupied
    pub fn get(&self, index: usize) -> Option<TablePtr> {
        if index >= MAX_TABLES {
            return None;
        }
        self.tables[index].read().clone()
    }

    /// Where the table formerly at `index` was relocated by a DROP, if known
    ///
    /// Best-effort bookkeeping for external observers; not part of the
    /// protocol's correctness.
    pub fn moved_slot(&self, index: usize) -> Option<usize> {
        if index >= MAX_TABLES {
            return None;
        }
        match self.moved_to[index].load(Ordering::Relaxed) {
            NPOS => None,
            target => Some(target),
        }
    }

    /// Reserve a slot for a new table
    ///
    /// Returns a closed reservation when the catalog (including pending
    /// creates) is full.
    pub fn reserve_create(&self) -> Reservation<'_> {
        if self.reserved_size.load(Ordering::SeqCst) < MAX_TABLES {
            let reserved = self.reserved_size.fetch_add(1, Ordering::SeqCst) + 1;
            if reserved > MAX_TABLES {
                self.reserved_size.fetch_sub(1, Ordering::SeqCst);
                return Reservation::closed();
            }
            return Reservation {
                inner: Inner::Create {
                    meta: self,
                    table: Table::default(),
                },
                index: None,
            };
        }
        Reservation::closed()
    }

    /// Lock `index` for modification and hand out a deep copy to edit
    ///
    /// Returns a closed reservation when the slot is empty.
    pub fn reserve_alter(&self, index: usize) -> Reservation<'_> {
        if index >= MAX_TABLES {
            return Reservation::closed();
        }
        let guard = self.tables[index].write();
        let copy = match guard.as_ref() {
            Some(table) => (**table).clone(),
            None => return Reservation::closed(),
        };
        Reservation {
            inner: Inner::Alter { guard, table: copy },
            index: Some(index),
        }
    }

    /// Lock `index` for removal
    ///
    /// Returns a closed reservation when the slot is empty.
    pub fn reserve_drop(&self, index: usize) -> Reservation<'_> {
        if index >= MAX_TABLES {
            return Reservation::closed();
        }
        let guard = self.tables[index].write();
        let table = match guard.as_ref() {
            Some(table) => Arc::clone(table),
            None => return Reservation::closed(),
        };
        Reservation {
            inner: Inner::Drop {
                meta: self,
                index,
                guard,
                table,
            },
            index: Some(index),
        }
    }

    /// Deep copy of the current contents
    ///
    /// Intended for quiescent catalogs (validation); concurrent mutations
    /// make the copy a best-effort snapshot.
    pub fn snapshot(&self) -> Metadata {
        let copy = Metadata::new();
        for index in 0..MAX_TABLES {
            if let Some(table) = self.get(index) {
                *copy.tables[index].write() = Some(Arc::new((*table).clone()));
            }
            copy.moved_to[index].store(self.moved_to[index].load(Ordering::Relaxed), Ordering::Relaxed);
        }
        copy.table_count
            .store(self.table_count.load(Ordering::SeqCst), Ordering::SeqCst);
        copy.reserved_size
            .store(self.reserved_size.load(Ordering::SeqCst), Ordering::SeqCst);
        copy
    }

    /// Empty the catalog
    pub fn reset(&self) {
        for index in 0..MAX_TABLES {
            let mut slot = self.tables[index].write();
            *slot = None;
            self.moved_to[index].store(NPOS, Ordering::Relaxed);
        }
        self.table_count.store(0, Ordering::SeqCst);
        self.reserved_size.store(0, Ordering::SeqCst);
    }

    /// Human-readable dump of all tables sorted by name
    pub fn dump(&self) -> String {
        let mut lines = vec![format!("Metadata dump (size={}):", self.size())];

        for table in self.sorted_tables() {
            lines.push(table.dump());
            lines.push(String::new());
        }

        lines.join("\n")
    }

    fn sorted_tables(&self) -> Vec<TablePtr> {
        let mut tables: Vec<TablePtr> = (0..MAX_TABLES).filter_map(|i| self.get(i)).collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }

    /// Install a completed CREATE at the end of the occupied range
    fn install_new(&self, table: Table) -> usize {
        let ptr = Arc::new(table);
        loop {
            let size = self.size();
            if size == 0 {
                let mut first = self.tables[0].write();
                if self.size() != 0 {
                    // another create won the empty-catalog race
                    continue;
                }
                *first = Some(ptr);
                self.table_count.fetch_add(1, Ordering::SeqCst);
                return 0;
            }

            let last = size - 1;
            let last_guard = self.tables[last].write();
            if last_guard.is_none() || self.size() != size {
                // a create or drop completed first and moved the end
                continue;
            }

            // The last slot is pinned under its lock and size only changes
            // while that lock is held, so the slot after it is ours.
            let mut next = self.tables[size].write();
            *next = Some(ptr);
            self.table_count.fetch_add(1, Ordering::SeqCst);
            return size;
        }
    }

    /// Remove the table at `index` (already locked by `guard`) and compact
    fn compact_remove<'a>(&'a self, index: usize, mut guard: RwLockWriteGuard<'a, Option<TablePtr>>) {
        loop {
            // At least one slot is occupied: ours, and it is locked.
            let size = self.size();
            if index == size - 1 {
                // Dropping the last slot: no move needed. A concurrent CREATE
                // targets this slot's lock first, so it waits until we are
                // done and then finds the new end.
                *guard = None;
                self.table_count.fetch_sub(1, Ordering::SeqCst);
                self.reserved_size.fetch_sub(1, Ordering::SeqCst);
                self.moved_to[index].store(NPOS, Ordering::Relaxed);
                return;
            }

            let last = size - 1;
            #[cfg(test)]
            drop_verify_pause();
            let mut last_guard = self.tables[last].write();
            if last_guard.is_none() || last != self.size() - 1 {
                // a racing drop or create changed the end before we locked it
                continue;
            }

            *guard = last_guard.take();
            self.table_count.fetch_sub(1, Ordering::SeqCst);
            self.reserved_size.fetch_sub(1, Ordering::SeqCst);
            self.moved_to[last].store(index, Ordering::Relaxed);
            return;
        }
    }
}

impl PartialEq for Metadata {
    fn eq(&self, other: &Self) -> bool {
        if self.size() != other.size() {
            return false;
        }

        let ours = self.sorted_tables();
        let theirs = other.sorted_tables();

        ours.len() == theirs.len()
            && ours
                .iter()
                .zip(theirs.iter())
                .all(|(a, b)| (**a) == (**b))
    }
}

enum Inner<'a> {
    /// Never opened (capacity, empty slot) or cancelled
    Closed,
    Completed,
    Create {
        meta: &'a Metadata,
        table: Table,
    },
    Alter {
        guard: RwLockWriteGuard<'a, Option<TablePtr>>,
        table: Table,
    },
    Drop {
        meta: &'a Metadata,
        index: usize,
        guard: RwLockWriteGuard<'a, Option<TablePtr>>,
        table: TablePtr,
    },
}

/// A scope-bound mutation ticket on the catalog
///
/// Obtained from `reserve_create` / `reserve_alter` / `reserve_drop`.
/// Cancels itself when dropped without `complete()`.
pub struct Reservation<'a> {
    inner: Inner<'a>,
    index: Option<usize>,
}

impl<'a> Reservation<'a> {
    fn closed() -> Self {
        Self {
            inner: Inner::Closed,
            index: None,
        }
    }

    /// True while the reservation can still be completed or cancelled
    pub fn open(&self) -> bool {
        matches!(
            self.inner,
            Inner::Create { .. } | Inner::Alter { .. } | Inner::Drop { .. }
        )
    }

    /// Slot index: the reserved slot for ALTER/DROP, the installed slot for
    /// a completed CREATE
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// The table this reservation refers to
    pub fn table(&self) -> Option<&Table> {
        match &self.inner {
            Inner::Create { table, .. } | Inner::Alter { table, .. } => Some(table),
            Inner::Drop { table, .. } => Some(&**table),
            _ => None,
        }
    }

    /// Mutable access to the table under construction (CREATE) or the
    /// private copy being edited (ALTER)
    pub fn table_mut(&mut self) -> Option<&mut Table> {
        match &mut self.inner {
            Inner::Create { table, .. } | Inner::Alter { table, .. } => Some(table),
            _ => None,
        }
    }

    /// Publish the reservation's effect on the catalog
    pub fn complete(&mut self) -> MetadataResult<()> {
        match std::mem::replace(&mut self.inner, Inner::Completed) {
            Inner::Closed => {
                self.inner = Inner::Closed;
                Err(MetadataError::InvalidReservation)
            }
            Inner::Completed => Err(MetadataError::DoubleComplete),
            Inner::Create { meta, table } => {
                self.index = Some(meta.install_new(table));
                Ok(())
            }
            Inner::Alter { mut guard, table } => {
                *guard = Some(Arc::new(table));
                Ok(())
            }
            Inner::Drop {
                meta,
                index,
                guard,
                table: _,
            } => {
                meta.compact_remove(index, guard);
                Ok(())
            }
        }
    }

    /// Abandon the reservation, releasing any lock or reserved slot
    pub fn cancel(&mut self) {
        match std::mem::replace(&mut self.inner, Inner::Closed) {
            Inner::Create { meta, .. } => {
                meta.reserved_size.fetch_sub(1, Ordering::SeqCst);
                self.index = None;
            }
            Inner::Completed => {
                self.inner = Inner::Completed;
            }
            Inner::Alter { .. } | Inner::Drop { .. } => {
                // guards released by dropping them
                self.index = None;
            }
            Inner::Closed => {}
        }
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.open() {
            self.cancel();
        }
    }
}

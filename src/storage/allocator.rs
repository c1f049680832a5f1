//! Version allocation and per-name serialization.
//!
//! [`VersionAllocator::next_version`] reads the index and decides; it is not atomic on
//! its own. Callers hold a [`NameGuard`] for the file name from allocation through the
//! metadata commit, so two writers on the same name never compute the same number.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::storage::address::VersionNumber;
use crate::storage::{IndexResult, MetadataIndex};

struct LockTable {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Table of exclusive locks keyed by file name.
///
/// Entries exist only while held; the table does not grow with the number of
/// names ever seen.
#[derive(Clone)]
pub struct NameLocks {
    table: Arc<LockTable>,
}

impl Default for NameLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl NameLocks {
    pub fn new() -> Self {
        Self {
            table: Arc::new(LockTable {
                held: Mutex::new(HashSet::new()),
                released: Condvar::new(),
            }),
        }
    }

    /// Blocks until `name` is free, then holds it until the guard is dropped.
    pub fn lock(&self, name: &str) -> NameGuard {
        let mut held = self.table.held.lock();
        while held.contains(name) {
            trace!(name = %name, "Waiting for name lock");
            self.table.released.wait(&mut held);
        }
        held.insert(name.to_string());
        trace!(name = %name, "Name lock acquired");
        NameGuard {
            table: self.table.clone(),
            name: name.to_string(),
        }
    }

    /// Takes the lock only if nobody holds it.
    #[cfg(test)]
    fn try_lock(&self, name: &str) -> Option<NameGuard> {
        let mut held = self.table.held.lock();
        if !held.insert(name.to_string()) {
            return None;
        }
        Some(NameGuard {
            table: self.table.clone(),
            name: name.to_string(),
        })
    }

    #[cfg(test)]
    fn is_locked(&self, name: &str) -> bool {
        self.table.held.lock().contains(name)
    }

    /// Number of names currently held.
    #[cfg(test)]
    fn held_count(&self) -> usize {
        self.table.held.lock().len()
    }
}

/// Releases its name when dropped.
pub struct NameGuard {
    table: Arc<LockTable>,
    name: String,
}

impl Drop for NameGuard {
    fn drop(&mut self) {
        self.table.held.lock().remove(&self.name);
        self.table.released.notify_all();
        trace!(name = %self.name, "Name lock released");
    }
}

/// Computes the next version number for a file name.
pub struct VersionAllocator {
    index: Arc<MetadataIndex>,
}

impl VersionAllocator {
    pub fn new(index: Arc<MetadataIndex>) -> Self {
        Self { index }
    }

    /// One past the highest number ever allocated for `name`, or 1 for an unknown name.
    ///
    /// Must be called with the name's [`NameGuard`] held.
    pub fn next_version(&self, name: &str) -> IndexResult<VersionNumber> {
        let current = self.index.highest_allocated(name)?.unwrap_or(0);
        Ok(current + 1)
    }
}

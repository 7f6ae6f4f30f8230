//! Table-level repair lock.
//!
//! A lock row in the counter table marks a table as being repaired. Whoever
//! inserts the row holds the lock; the guard deletes it on drop.

use crate::code::TableKind;
use crate::error::SeqError;
use crate::store::RecordStore;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Releases the repair lock of a table when dropped
pub struct RepairLockGuard<'a, S: RecordStore> {
    store: &'a S,
    table: TableKind,
}

impl<'a, S: RecordStore> RepairLockGuard<'a, S> {
    /// Poll for the lock of `table` until it is free or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// [`SeqError::LockTimeout`] when another repair keeps holding the lock,
    /// [`SeqError::QueryFailure`] or [`SeqError::StoreRejected`] when the lock
    /// row cannot be written.
    pub fn acquire(store: &'a S, table: TableKind, timeout: Duration) -> Result<Self, SeqError> {
        let start = Instant::now();
        loop {
            if store.try_lock_table(table)? {
                log::debug!("Acquired repair lock on {table}");
                return Ok(Self { store, table });
            }
            if start.elapsed() >= timeout {
                return Err(SeqError::LockTimeout(format!(
                    "Failed to acquire the repair lock on {table} within {} seconds. \
                     Another repair may be running. If this persists, delete the lock row \
                     (doc_type = '#LOCK', scope_code = '{table}') from the counter table",
                    timeout.as_secs()
                )));
            }
            std::thread::sleep(POLL_INTERVAL.min(timeout.saturating_sub(start.elapsed())));
        }
    }

    pub fn table(&self) -> TableKind {
        self.table
    }
}

impl<S: RecordStore> Drop for RepairLockGuard<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.store.unlock_table(self.table) {
            log::warn!("Failed to release repair lock on {}: {e}", self.table);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_guard_releases_on_drop() {
        let store = MemoryStore::new();
        {
            let guard = RepairLockGuard::acquire(&store, TableKind::Manifests, Duration::ZERO).unwrap();
            assert_eq!(guard.table(), TableKind::Manifests);
            assert!(store.is_locked(TableKind::Manifests));
        }
        assert!(!store.is_locked(TableKind::Manifests));
    }

    #[test]
    fn test_held_lock_times_out() {
        let store = MemoryStore::new();
        let _held = RepairLockGuard::acquire(&store, TableKind::Materials, Duration::ZERO).unwrap();
        let err = RepairLockGuard::acquire(&store, TableKind::Materials, Duration::from_millis(150))
            .err()
            .unwrap();
        assert!(matches!(err, SeqError::LockTimeout(_)));
        assert!(RepairLockGuard::acquire(&store, TableKind::Manifests, Duration::ZERO).is_ok());
    }
}

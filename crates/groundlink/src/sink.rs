//! Persistence sink abstraction.
//!
//! A sink stores snapshots keyed by packet id. Writes are idempotent: a batch
//! containing an id that is already stored replaces the stored record. The
//! SQLite implementation lives in [`crate::storage`]; [`MemorySink`] keeps
//! everything in a map and is meant for tests and embedding.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::buffer::Batch;
use crate::error::{Error, Result};
use crate::telemetry::TelemetrySnapshot;

/// Lazily produced stored snapshots, in packet id order.
pub type SnapshotIter<'a> = Box<dyn Iterator<Item = Result<TelemetrySnapshot>> + 'a>;

/// Durable store for telemetry snapshots.
///
/// Implementations are driven from a single persistence worker and only need
/// to be `Send`.
pub trait PersistenceSink: Send {
    /// Insert or replace every record in `batch`. Returns the number written.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be stored. Implementations
    /// should leave the store unchanged in that case.
    fn upsert(&mut self, batch: Batch) -> Result<usize>;

    /// Remove every stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not be cleared.
    fn clear(&mut self) -> Result<()>;

    /// Number of stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not be queried.
    fn count(&self) -> Result<u64>;

    /// Every stored record ordered by packet id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read could not be started; later read failures
    /// are yielded by the iterator.
    fn stream_all(&self) -> Result<SnapshotIter<'_>>;
}

/// In-memory sink backed by an ordered map.
///
/// Clones share the same map, so a test can hand one clone to the persistence
/// worker and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<BTreeMap<i64, TelemetrySnapshot>>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored record in packet id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the map lock is poisoned.
    pub fn records(&self) -> Result<Vec<TelemetrySnapshot>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<i64, TelemetrySnapshot>>> {
        self.records
            .lock()
            .map_err(|_| Error::internal("memory sink lock poisoned"))
    }
}

impl PersistenceSink for MemorySink {
    fn upsert(&mut self, batch: Batch) -> Result<usize> {
        let mut records = self.lock()?;
        let written = batch.len();
        for snapshot in batch {
            records.insert(snapshot.packet_id, snapshot);
        }
        Ok(written)
    }

    fn clear(&mut self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    fn count(&self) -> Result<u64> {
        Ok(self.lock()?.len() as u64)
    }

    fn stream_all(&self) -> Result<SnapshotIter<'_>> {
        // Copies under the lock; the map already lives in memory.
        let records = self.records()?;
        Ok(Box::new(records.into_iter().map(Ok)))
    }
}

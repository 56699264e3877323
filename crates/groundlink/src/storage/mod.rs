//! Storage layer for groundlink.
//!
//! This module provides `SQLite`-based persistent storage for telemetry
//! snapshots. Records are keyed by packet id; each batch is written in one
//! transaction and stored records are read back through a keyset-paginated
//! cursor so a full dump never holds the whole flight in memory.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, info};

use crate::buffer::Batch;
use crate::error::{Error, Result};
use crate::sink::{PersistenceSink, SnapshotIter};
use crate::telemetry::{MissionState, TelemetrySnapshot};

/// Default number of rows fetched per page by [`Storage::stream_all`].
pub const DEFAULT_PAGE_SIZE: usize = 512;

/// Storage engine for telemetry snapshots.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
    /// Rows per page when streaming.
    page_size: usize,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let mut conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL lets `gndlink status` read while an ingest session writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&mut conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            path,
            conn,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&mut conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Set the number of rows fetched per page when streaming.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let (count, first_id, last_id, first_time, last_time): (
            i64,
            Option<i64>,
            Option<i64>,
            Option<f64>,
            Option<f64>,
        ) = self.conn.query_row(
            r"
            SELECT COUNT(*), MIN(packet_id), MAX(packet_id), MIN(mission_time), MAX(mission_time)
            FROM telemetry
            ",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            record_count: u64::try_from(count).unwrap_or_default(),
            first_packet_id: first_id,
            last_packet_id: last_id,
            first_mission_time: first_time,
            last_mission_time: last_time,
            db_size_bytes,
        })
    }

    /// Fetch up to `page_size` records with packet id greater than `after`.
    fn fetch_page(&self, after: i64) -> Result<Vec<TelemetrySnapshot>> {
        let mut stmt = self.conn.prepare_cached(schema::SELECT_PAGE_AFTER)?;
        let limit = i64::try_from(self.page_size).unwrap_or(i64::MAX);
        let mut rows = stmt.query(params![after, limit])?;

        let mut page = Vec::with_capacity(self.page_size);
        while let Some(row) = rows.next()? {
            page.push(Self::row_to_snapshot(row)?);
        }
        Ok(page)
    }

    /// Convert a database row to a snapshot.
    fn row_to_snapshot(row: &rusqlite::Row) -> Result<TelemetrySnapshot> {
        let packet_id: i64 = row.get(0)?;
        let raw_state: i64 = row.get(1)?;
        let mission_state = u8::try_from(raw_state)
            .ok()
            .and_then(|v| MissionState::try_from(v).ok())
            .ok_or_else(|| Error::CorruptRecord {
                packet_id,
                message: format!("mission state {raw_state} out of range"),
            })?;

        Ok(TelemetrySnapshot {
            packet_id,
            mission_state,
            mission_time: row.get(2)?,
            timestamp: row.get(3)?,
            battery_voltage: row.get(4)?,
            pressure: row.get(5)?,
            temperature: row.get(6)?,
            altitude: row.get(7)?,
            velocity_z: row.get(8)?,
            gps_lat: row.get(9)?,
            gps_lng: row.get(10)?,
            gps_alt: row.get(11)?,
            gps_sats: row.get(12)?,
            acc_x: row.get(13)?,
            acc_y: row.get(14)?,
            acc_z: row.get(15)?,
            gyro_x: row.get(16)?,
            gyro_y: row.get(17)?,
            gyro_z: row.get(18)?,
            mag_x: row.get(19)?,
            mag_y: row.get(20)?,
            mag_z: row.get(21)?,
            lora_rssi: row.get(22)?,
            lora_snr: row.get(23)?,
        })
    }
}

impl PersistenceSink for Storage {
    fn upsert(&mut self, batch: Batch) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(schema::UPSERT_TELEMETRY)?;
            for s in &batch {
                stmt.execute(params![
                    s.packet_id,
                    u8::from(s.mission_state),
                    s.mission_time,
                    s.timestamp,
                    s.battery_voltage,
                    s.pressure,
                    s.temperature,
                    s.altitude,
                    s.velocity_z,
                    s.gps_lat,
                    s.gps_lng,
                    s.gps_alt,
                    s.gps_sats,
                    s.acc_x,
                    s.acc_y,
                    s.acc_z,
                    s.gyro_x,
                    s.gyro_y,
                    s.gyro_z,
                    s.mag_x,
                    s.mag_y,
                    s.mag_z,
                    s.lora_rssi,
                    s.lora_snr,
                ])?;
            }
        }
        tx.commit()?;

        debug!(records = batch.len(), "Stored batch");
        Ok(batch.len())
    }

    fn clear(&mut self) -> Result<()> {
        let removed = self.conn.execute("DELETE FROM telemetry", [])?;
        info!(removed, "Cleared stored telemetry");
        Ok(())
    }

    fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn stream_all(&self) -> Result<SnapshotIter<'_>> {
        Ok(Box::new(StoredSnapshots {
            storage: self,
            last_id: None,
            page: Vec::new().into_iter(),
            done: false,
        }))
    }
}

/// Keyset-paginated scan over the telemetry table.
struct StoredSnapshots<'a> {
    storage: &'a Storage,
    last_id: Option<i64>,
    page: std::vec::IntoIter<TelemetrySnapshot>,
    done: bool,
}

impl Iterator for StoredSnapshots<'_> {
    type Item = Result<TelemetrySnapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(snapshot) = self.page.next() {
                self.last_id = Some(snapshot.packet_id);
                return Some(Ok(snapshot));
            }
            if self.done {
                return None;
            }

            match self.storage.fetch_page(self.last_id.unwrap_or(i64::MIN)) {
                Ok(page) => {
                    if page.len() < self.storage.page_size {
                        self.done = true;
                    }
                    self.page = page.into_iter();
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStats {
    /// Total number of stored records.
    pub record_count: u64,
    /// Lowest stored packet id.
    pub first_packet_id: Option<i64>,
    /// Highest stored packet id.
    pub last_packet_id: Option<i64>,
    /// Earliest stored mission time in seconds.
    pub first_mission_time: Option<f64>,
    /// Latest stored mission time in seconds.
    pub last_mission_time: Option<f64>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    fn snapshot(packet_id: i64) -> TelemetrySnapshot {
        TelemetrySnapshot {
            packet_id,
            mission_state: MissionState::Coast,
            mission_time: packet_id as f64 * 0.1,
            timestamp: 1_700_000_000_000 + packet_id,
            altitude: 100.0 + packet_id as f64,
            gps_lat: -25.3316,
            gps_lng: -57.5171,
            gps_sats: 8,
            pressure: 1000.0,
            lora_rssi: -90.0,
            ..TelemetrySnapshot::default()
        }
    }

    #[test]
    fn test_open_in_memory() {
        assert!(Storage::open_in_memory().is_ok());
    }

    #[test]
    fn test_upsert_and_stream() {
        let mut storage = create_test_storage();
        let written = storage.upsert(vec![snapshot(1), snapshot(2)]).unwrap();
        assert_eq!(written, 2);

        let records: Vec<TelemetrySnapshot> = storage
            .stream_all()
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records, vec![snapshot(1), snapshot(2)]);
    }

    #[test]
    fn test_upsert_overwrites_duplicates() {
        let mut storage = create_test_storage();
        storage.upsert(vec![snapshot(7)]).unwrap();

        let mut changed = snapshot(7);
        changed.altitude = 999.0;
        changed.mission_state = MissionState::Landed;
        storage.upsert(vec![changed.clone()]).unwrap();

        assert_eq!(storage.count().unwrap(), 1);
        let stored = storage.stream_all().unwrap().next().unwrap().unwrap();
        assert_eq!(stored, changed);
    }

    #[test]
    fn test_duplicate_within_batch_keeps_last() {
        let mut storage = create_test_storage();
        let mut second = snapshot(3);
        second.temperature = 21.5;
        storage.upsert(vec![snapshot(3), second.clone()]).unwrap();

        assert_eq!(storage.count().unwrap(), 1);
        let stored = storage.stream_all().unwrap().next().unwrap().unwrap();
        assert_eq!(stored, second);
    }

    #[test]
    fn test_stream_all_pages_in_order() {
        let mut storage = create_test_storage().with_page_size(3);
        let batch: Batch = [9, 1, 5, 3, 7, 2, 8, 4, 6, 10].into_iter().map(snapshot).collect();
        storage.upsert(batch).unwrap();

        let ids: Vec<i64> = storage
            .stream_all()
            .unwrap()
            .map(|r| r.unwrap().packet_id)
            .collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_stream_all_page_boundary() {
        let mut storage = create_test_storage().with_page_size(5);
        storage.upsert((1..=5).map(snapshot).collect()).unwrap();
        assert_eq!(storage.stream_all().unwrap().count(), 5);
    }

    #[test]
    fn test_stream_all_empty() {
        let storage = create_test_storage();
        assert_eq!(storage.stream_all().unwrap().count(), 0);
    }

    #[test]
    fn test_clear() {
        let mut storage = create_test_storage();
        storage.upsert((1..=4).map(snapshot).collect()).unwrap();
        storage.clear().unwrap();
        assert_eq!(storage.count().unwrap(), 0);
    }

    #[test]
    fn test_corrupt_mission_state() {
        let mut storage = create_test_storage();
        storage.upsert(vec![snapshot(1)]).unwrap();
        storage
            .conn
            .execute("UPDATE telemetry SET mission_state = 42", [])
            .unwrap();

        let err = storage.stream_all().unwrap().next().unwrap().unwrap_err();
        assert!(matches!(err, Error::CorruptRecord { packet_id: 1, .. }));
    }

    #[test]
    fn test_stats_empty() {
        let stats = create_test_storage().stats().unwrap();
        assert_eq!(stats.record_count, 0);
        assert_eq!(stats.first_packet_id, None);
        assert_eq!(stats.last_mission_time, None);
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_stats_with_data() {
        let mut storage = create_test_storage();
        storage.upsert((10..=20).map(snapshot).collect()).unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.record_count, 11);
        assert_eq!(stats.first_packet_id, Some(10));
        assert_eq!(stats.last_packet_id, Some(20));
        assert!((stats.last_mission_time.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_open_file_based() {
        let db_path = std::env::temp_dir().join(format!("groundlink_test_{}.db", std::process::id()));

        let mut storage = Storage::open(&db_path).unwrap();
        storage.upsert(vec![snapshot(1)]).unwrap();
        assert_eq!(storage.path(), db_path);
        drop(storage);

        // Reopen and read back
        let storage = Storage::open(&db_path).unwrap();
        assert_eq!(storage.count().unwrap(), 1);
        assert!(storage.stats().unwrap().db_size_bytes > 0);

        drop(storage);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let root = std::env::temp_dir().join(format!("groundlink_test_dirs_{}", std::process::id()));
        let nested_path = root.join("nested/telemetry.db");
        let _ = std::fs::remove_dir_all(&root);

        let storage = Storage::open(&nested_path).unwrap();
        assert!(nested_path.exists());

        drop(storage);
        let _ = std::fs::remove_dir_all(&root);
    }
}

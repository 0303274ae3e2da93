//! Database module for DuckDB connection and schema management.
//!
//! This module handles:
//! - DuckDB connection initialization in the data directory
//! - Schema creation for the tracks table
//! - The persistent [`TrackStore`] implementation

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use duckdb::{params, Connection, OptionalExt, Result as DuckResult, Row};

use crate::models::{next_insert_stamp, NewTrack, TrackRecord};
use crate::store::{InsertOutcome, StoreError, TrackStore};

const TRACK_COLUMNS: &str =
    "id, source_url, pilot, glider, glider_id, flight_date, total_distance, inserted_at";

/// Thread-safe database manager
pub struct Database {
    conn: Mutex<Connection>,
}

impl Drop for Database {
    fn drop(&mut self) {
        log::info!("Dropping Database instance, DuckDB will flush remaining WAL data");
    }
}

impl Database {
    /// Initialize the database in the data directory.
    ///
    /// Creates the following directory structure:
    /// ```text
    /// {data_dir}/
    /// └── tracks.db       # DuckDB database file
    /// ```
    pub fn new(data_dir: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&data_dir)?;

        let db_path = data_dir.join("tracks.db");
        log::info!("Initializing DuckDB at: {:?}", db_path);

        let conn = Self::open_with_recovery(&db_path)?;
        Self::configure_connection(&conn)?;

        if let Err(e) = conn.execute_batch("CHECKPOINT;") {
            log::warn!("WAL checkpoint failed (non-fatal): {}", e);
        }

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Non-persistent DuckDB instance
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn open_with_recovery(db_path: &Path) -> Result<Connection, StoreError> {
        match Connection::open(db_path) {
            Ok(conn) => Ok(conn),
            Err(err) => {
                log::warn!("DuckDB open failed: {}. Attempting WAL recovery...", err);

                let wal_path = db_path.with_extension("db.wal");
                if wal_path.exists() {
                    if let Err(wal_err) = fs::remove_file(&wal_path) {
                        log::warn!("Failed to remove WAL file {:?}: {}", wal_path, wal_err);
                    } else {
                        log::info!("Removed WAL file {:?}", wal_path);
                    }
                }

                match Connection::open(db_path) {
                    Ok(conn) => Ok(conn),
                    Err(second_err) => {
                        log::warn!("WAL recovery failed: {}. Backing up DB and recreating...", second_err);

                        let backup_path = Self::backup_db(db_path)?;
                        log::warn!("Database backed up to {:?}", backup_path);

                        Connection::open(db_path).map_err(StoreError::from)
                    }
                }
            }
        }
    }

    /// Move an unreadable database aside before recreating it
    fn backup_db(db_path: &Path) -> Result<PathBuf, StoreError> {
        if !db_path.exists() {
            return Ok(db_path.to_path_buf());
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let backup_path = db_path.with_extension(format!("db.bak.{}", timestamp));
        fs::rename(db_path, &backup_path)?;

        let wal_path = db_path.with_extension("db.wal");
        if wal_path.exists() {
            let wal_backup = db_path.with_extension(format!("db.wal.bak.{}", timestamp));
            if let Err(e) = fs::rename(&wal_path, &wal_backup) {
                log::warn!("Failed to back up WAL file {:?}: {}", wal_path, e);
            }
        }

        Ok(backup_path)
    }

    fn configure_connection(conn: &Connection) -> DuckResult<()> {
        conn.execute_batch(
            r#"
            SET threads = 2;
            SET enable_progress_bar = false;
            PRAGMA wal_autocheckpoint='16MB';
            "#,
        )?;
        Ok(())
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- ============================================================
            -- TRACKS TABLE: one summary row per ingested IGC source URL
            -- ============================================================
            CREATE TABLE IF NOT EXISTS tracks (
                id              BIGINT PRIMARY KEY,      -- dense, zero-based insertion rank
                source_url      VARCHAR NOT NULL UNIQUE, -- de-duplication key
                pilot           VARCHAR NOT NULL,
                glider          VARCHAR NOT NULL,
                glider_id       VARCHAR NOT NULL,
                flight_date     VARCHAR NOT NULL,
                total_distance  DOUBLE NOT NULL,         -- kilometres
                inserted_at     VARCHAR NOT NULL         -- ticker cursor value
            );

            CREATE INDEX IF NOT EXISTS idx_tracks_inserted_at
                ON tracks(inserted_at);
            "#,
        )?;

        log::info!("Database schema initialized successfully");
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn row_to_track(row: &Row<'_>) -> DuckResult<TrackRecord> {
        Ok(TrackRecord {
            id: row.get::<_, i64>(0)? as u64,
            source_url: row.get(1)?,
            pilot: row.get(2)?,
            glider: row.get(3)?,
            glider_id: row.get(4)?,
            flight_date: row.get(5)?,
            total_distance: row.get(6)?,
            inserted_at: row.get(7)?,
        })
    }

    fn find_id_by_url(conn: &Connection, source_url: &str) -> DuckResult<Option<u64>> {
        conn.query_row(
            "SELECT id FROM tracks WHERE source_url = ?",
            params![source_url],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .map(|id| id.map(|id| id as u64))
    }
}

impl TrackStore for Database {
    fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn insert_if_absent(&self, track: NewTrack) -> Result<InsertOutcome, StoreError> {
        let conn = self.conn()?;

        if let Some(id) = Self::find_id_by_url(&conn, &track.source_url)? {
            return Ok(InsertOutcome { id, existed: true });
        }

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        let previous: Option<String> = conn
            .query_row(
                "SELECT inserted_at FROM tracks ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let inserted_at = next_insert_stamp(previous.as_deref(), Utc::now());

        conn.execute(
            r#"
            INSERT INTO tracks (
                id, source_url, pilot, glider, glider_id,
                flight_date, total_distance, inserted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                count,
                track.source_url,
                track.pilot,
                track.glider,
                track.glider_id,
                track.flight_date,
                track.total_distance,
                inserted_at,
            ],
        )?;

        log::info!("Inserted track with ID: {}", count);
        Ok(InsertOutcome {
            id: count as u64,
            existed: false,
        })
    }

    fn get_by_id(&self, id: u64) -> Result<TrackRecord, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM tracks WHERE id = ?", TRACK_COLUMNS),
            params![id as i64],
            Self::row_to_track,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn get_by_url(&self, source_url: &str) -> Result<Option<TrackRecord>, StoreError> {
        let conn = self.conn()?;
        let track = conn
            .query_row(
                &format!("SELECT {} FROM tracks WHERE source_url = ?", TRACK_COLUMNS),
                params![source_url],
                Self::row_to_track,
            )
            .optional()?;
        Ok(track)
    }

    fn get_all(&self) -> Result<Vec<TrackRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM tracks ORDER BY id ASC", TRACK_COLUMNS))?;
        let tracks = stmt
            .query_map([], Self::row_to_track)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tracks)
    }

    fn get_latest(&self) -> Result<TrackRecord, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM tracks ORDER BY id DESC LIMIT 1", TRACK_COLUMNS),
            [],
            Self::row_to_track,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound("latest".to_string()))
    }

    fn clear(&self) -> Result<u64, StoreError> {
        let start = std::time::Instant::now();
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM tracks", [])?;
        log::info!(
            "Deleted {} tracks in {:.1}ms",
            removed,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(removed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::store::tests::{exercise_concurrent_same_url, exercise_store, new_track};
    use tempfile::tempdir;

    #[test]
    fn test_database_initialization() {
        let temp_dir = tempdir().unwrap();
        let db = Database::new(temp_dir.path().to_path_buf()).unwrap();

        assert!(temp_dir.path().join("tracks.db").exists());
        assert!(db.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_in_memory_database_contract() {
        exercise_store(&Database::open_in_memory().unwrap());
    }

    #[test]
    fn test_tracks_survive_reopen() {
        let temp_dir = tempdir().unwrap();
        {
            let db = Database::new(temp_dir.path().to_path_buf()).unwrap();
            db.insert_if_absent(new_track("http://x/a.igc")).unwrap();
            db.insert_if_absent(new_track("http://x/b.igc")).unwrap();
        }

        let db = Database::new(temp_dir.path().to_path_buf()).unwrap();
        assert_eq!(db.count().unwrap(), 2);
        let b = db.get_by_id(1).unwrap();
        assert_eq!(b.source_url, "http://x/b.igc");
        assert_eq!(b.total_distance, 12.5);

        let next = db.insert_if_absent(new_track("http://x/c.igc")).unwrap();
        assert_eq!(next.id, 2);
        assert!(db.get_by_id(1).unwrap().inserted_at < db.get_by_id(2).unwrap().inserted_at);
    }

    #[test]
    fn test_in_memory_database_concurrent_same_url() {
        exercise_concurrent_same_url(Arc::new(Database::open_in_memory().unwrap()));
    }

    #[test]
    fn test_on_disk_database_concurrent_same_url() {
        let temp_dir = tempdir().unwrap();
        exercise_concurrent_same_url(Arc::new(Database::new(temp_dir.path().to_path_buf()).unwrap()));
    }

    #[test]
    fn test_schema_rejects_duplicate_source_url() {
        let db = Database::open_in_memory().unwrap();
        db.insert_if_absent(new_track("http://x/a.igc")).unwrap();

        // Writes that bypass insert_if_absent still cannot duplicate a URL
        let raw = db.conn().unwrap().execute(
            "INSERT INTO tracks VALUES (1, 'http://x/a.igc', 'p', 'g', 'id', '2016-02-19', 0.0, 'later')",
            [],
        );
        assert!(raw.is_err());
        assert_eq!(db.count().unwrap(), 1);

        let again = db.insert_if_absent(new_track("http://x/a.igc")).unwrap();
        assert_eq!(again, InsertOutcome { id: 0, existed: true });
    }

    #[test]
    fn test_backup_moves_wal_with_database() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("tracks.db");
        fs::write(&db_path, b"corrupt").unwrap();
        fs::write(db_path.with_extension("db.wal"), b"wal").unwrap();

        let backup = Database::backup_db(&db_path).unwrap();
        assert!(backup.exists());
        assert!(!db_path.exists());
        assert!(!db_path.with_extension("db.wal").exists());

        let names: Vec<String> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("tracks.db.wal.bak.")));
    }
}

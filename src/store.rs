//! Track storage contract shared by ingestion and the ticker.
//!
//! Ids are a dense, zero-based sequence equal to the store's count at the
//! moment of insertion. Implementations must run the whole
//! check-assign-insert sequence of [`TrackStore::insert_if_absent`] as one
//! atomic step so concurrent ingestion of the same URL yields one record.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use thiserror::Error;

use crate::models::{next_insert_stamp, NewTrack, TrackRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Track not found: {0}")]
    NotFound(String),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Result of an insert-if-absent call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub id: u64,
    /// True when a record with the same source URL was already stored
    pub existed: bool,
}

pub trait TrackStore: Send + Sync {
    fn count(&self) -> Result<u64, StoreError>;

    /// Insert unless a record with the same `source_url` exists.
    ///
    /// The store assigns `id` (= current count) and `inserted_at`.
    fn insert_if_absent(&self, track: NewTrack) -> Result<InsertOutcome, StoreError>;

    fn get_by_id(&self, id: u64) -> Result<TrackRecord, StoreError>;

    fn get_by_url(&self, source_url: &str) -> Result<Option<TrackRecord>, StoreError>;

    /// All records in insertion order
    fn get_all(&self) -> Result<Vec<TrackRecord>, StoreError>;

    /// Most recently inserted record
    fn get_latest(&self) -> Result<TrackRecord, StoreError>;

    /// Remove every record and reset the id sequence. Returns the number removed.
    fn clear(&self) -> Result<u64, StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    tracks: Vec<TrackRecord>,
    by_url: HashMap<String, u64>,
}

/// Non-persistent store, used with `STORE_BACKEND=memory` and in tests
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl TrackStore for MemoryStore {
    fn count(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.tracks.len() as u64)
    }

    fn insert_if_absent(&self, track: NewTrack) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.lock()?;

        if let Some(&id) = inner.by_url.get(&track.source_url) {
            return Ok(InsertOutcome { id, existed: true });
        }

        let id = inner.tracks.len() as u64;
        let previous = inner.tracks.last().map(|t| t.inserted_at.as_str());
        let inserted_at = next_insert_stamp(previous, Utc::now());

        inner.by_url.insert(track.source_url.clone(), id);
        inner.tracks.push(track.into_record(id, inserted_at));

        log::debug!("Inserted track with ID: {}", id);
        Ok(InsertOutcome { id, existed: false })
    }

    fn get_by_id(&self, id: u64) -> Result<TrackRecord, StoreError> {
        self.lock()?
            .tracks
            .get(id as usize)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn get_by_url(&self, source_url: &str) -> Result<Option<TrackRecord>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .by_url
            .get(source_url)
            .and_then(|&id| inner.tracks.get(id as usize))
            .cloned())
    }

    fn get_all(&self) -> Result<Vec<TrackRecord>, StoreError> {
        Ok(self.lock()?.tracks.clone())
    }

    fn get_latest(&self) -> Result<TrackRecord, StoreError> {
        self.lock()?
            .tracks
            .last()
            .cloned()
            .ok_or_else(|| StoreError::NotFound("latest".to_string()))
    }

    fn clear(&self) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let removed = inner.tracks.len() as u64;
        inner.tracks.clear();
        inner.by_url.clear();
        Ok(removed)
    }
}

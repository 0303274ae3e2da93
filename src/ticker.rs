//! Ticker: cursor-paginated, insertion-ordered view over stored tracks.
//!
//! Each call is stateless. The caller pages forward by passing the
//! `inserted_at` of a track as the cursor. The track matching the cursor is
//! itself the first element of the returned window, so a caller paging
//! with `t_stop` sees that boundary track twice.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::models::{PageResult, TrackRecord};
use crate::store::{StoreError, TrackStore};

/// Default number of ids per ticker window
pub const DEFAULT_PAGE_SIZE: usize = 5;

#[derive(Error, Debug)]
pub enum TickerError {
    #[error("No tracks stored")]
    NoContent,

    #[error("No track inserted at {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

pub struct Ticker {
    store: Arc<dyn TrackStore>,
    page_size: usize,
}

impl Ticker {
    /// `page_size` of zero is treated as one
    pub fn new(store: Arc<dyn TrackStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// `inserted_at` of the most recently stored track
    pub fn latest(&self) -> Result<String, TickerError> {
        match self.store.get_latest() {
            Ok(track) => Ok(track.inserted_at),
            Err(StoreError::NotFound(_)) => Err(TickerError::NoContent),
            Err(e) => Err(e.into()),
        }
    }

    /// Build one window.
    ///
    /// Without a cursor the window holds the oldest `page_size` tracks. With
    /// a cursor it starts at the track whose `inserted_at` equals the cursor
    /// exactly (inclusive) and runs for up to `page_size` tracks.
    pub fn page(&self, cursor: Option<&str>) -> Result<PageResult, TickerError> {
        let started = Instant::now();

        let tracks = self.store.get_all()?;
        let latest = tracks.last().ok_or(TickerError::NoContent)?;

        let start = match cursor {
            None => 0,
            Some(cursor) => tracks
                .iter()
                .position(|t| t.inserted_at == cursor)
                .ok_or_else(|| TickerError::NotFound(cursor.to_string()))?,
        };
        let stop = (start + self.page_size).min(tracks.len());
        let window: &[TrackRecord] = &tracks[start..stop];

        // start < len, so the window always holds at least the matched track
        let (first, last) = match (window.first(), window.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(TickerError::NoContent),
        };

        Ok(PageResult {
            latest_timestamp: latest.inserted_at.clone(),
            window_start_timestamp: first.inserted_at.clone(),
            window_stop_timestamp: last.inserted_at.clone(),
            ids: window.iter().map(|t| t.id).collect(),
            processing_millis: started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

//! Ingestion pipeline: URL validation, parse, distance, de-duplicated insert.

use std::sync::Arc;

use thiserror::Error;

use crate::models::NewTrack;
use crate::parser::{TrackPoint, TrackSource};
use crate::store::{StoreError, TrackStore};

/// File suffix accepted by [`IngestPipeline::ingest`]
pub const TRACK_FILE_EXTENSION: &str = "igc";

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Failed to parse track: {0}")]
    ParseFailure(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Sum of distances between consecutive points; zero for fewer than two points
pub fn total_distance(points: &[TrackPoint]) -> f64 {
    points.windows(2).map(|pair| pair[0].distance(&pair[1])).sum()
}

/// Lexical check that the URL's path ends in `.igc`, ignoring query and fragment
pub fn has_track_extension(url: &str) -> bool {
    let path_part = url
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or("");
    match path_part.rsplit_once('.') {
        Some((_, ext)) => !ext.contains('/') && ext.eq_ignore_ascii_case(TRACK_FILE_EXTENSION),
        None => false,
    }
}

pub struct IngestPipeline {
    store: Arc<dyn TrackStore>,
    source: Arc<dyn TrackSource>,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn TrackStore>, source: Arc<dyn TrackSource>) -> Self {
        Self { store, source }
    }

    /// Ingest the track at `source_url` and return its id.
    ///
    /// Idempotent per URL: a URL that is already stored returns the
    /// existing id without fetching the file again.
    pub async fn ingest(&self, source_url: &str) -> Result<u64, IngestError> {
        let source_url = source_url.trim();
        if source_url.is_empty() {
            return Err(IngestError::InvalidInput("missing key 'url'".to_string()));
        }
        if !has_track_extension(source_url) {
            return Err(IngestError::InvalidInput(format!(
                "not a .{} file",
                TRACK_FILE_EXTENSION
            )));
        }

        if let Some(existing) = self.store.get_by_url(source_url)? {
            log::info!("Track already ingested, skipping: {} (id {})", source_url, existing.id);
            return Ok(existing.id);
        }

        let import_start = std::time::Instant::now();
        log::info!("Ingesting track: {}", source_url);

        let parsed = self.source.fetch(source_url).await.map_err(|e| {
            log::warn!("Failed to parse track {}: {}", source_url, e);
            IngestError::ParseFailure(e.to_string())
        })?;

        let track = NewTrack {
            source_url: source_url.to_string(),
            total_distance: total_distance(&parsed.points),
            pilot: parsed.pilot,
            glider: parsed.glider,
            glider_id: parsed.glider_id,
            flight_date: parsed.date.to_string(),
        };

        let outcome = self.store.insert_if_absent(track)?;
        if outcome.existed {
            log::info!("Concurrent ingest of {} resolved to existing id {}", source_url, outcome.id);
        } else {
            log::info!(
                "Successfully ingested track {} with {} points in {:.2}s",
                outcome.id,
                parsed.points.len(),
                import_start.elapsed().as_secs_f64()
            );
        }

        Ok(outcome.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveTime};

    use crate::parser::{ParsedTrack, ParserError};
    use crate::store::MemoryStore;

    fn point(lat: f64, lon: f64) -> TrackPoint {
        TrackPoint {
            time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            latitude: lat,
            longitude: lon,
            pressure_alt: 0,
            gnss_alt: 0,
        }
    }

    /// Serves a fixed track and counts how often it was asked
    struct FakeSource {
        points: Vec<TrackPoint>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(points: Vec<TrackPoint>) -> Arc<Self> {
            Arc::new(Self {
                points,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TrackSource for FakeSource {
        async fn fetch(&self, url: &str) -> Result<ParsedTrack, ParserError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.contains("broken") {
                return Err(ParserError::IncompatibleFile);
            }
            tokio::task::yield_now().await;
            Ok(ParsedTrack {
                points: self.points.clone(),
                pilot: "Ada".to_string(),
                glider: "Ozone Rush 5".to_string(),
                glider_id: "D-1234".to_string(),
                date: NaiveDate::from_ymd_opt(2018, 10, 1).unwrap(),
            })
        }
    }

    fn pipeline(source: Arc<FakeSource>) -> (Arc<MemoryStore>, IngestPipeline) {
        let store = Arc::new(MemoryStore::new());
        let pipeline = IngestPipeline::new(store.clone(), source);
        (store, pipeline)
    }

    #[test]
    fn test_total_distance_accumulates_pairs() {
        assert_eq!(total_distance(&[]), 0.0);
        assert_eq!(total_distance(&[point(46.0, 7.0)]), 0.0);

        let a = point(46.0, 7.0);
        let b = point(46.1, 7.0);
        let c = point(46.1, 7.2);
        let expected = a.distance(&b) + b.distance(&c);
        assert!((total_distance(&[a, b, c]) - expected).abs() < 1e-9);
        assert!(expected > 0.0);
    }

    #[test]
    fn test_has_track_extension() {
        assert!(has_track_extension("http://example.com/a.igc"));
        assert!(has_track_extension("http://example.com/A.IGC"));
        assert!(has_track_extension("http://example.com/a.igc?dl=1"));
        assert!(!has_track_extension("http://example.com/a.igc.zip"));
        assert!(!has_track_extension("http://example.com/igc"));
        assert!(!has_track_extension("http://example.com/a.txt"));
        assert!(!has_track_extension(""));
        // The suffix is matched on the raw text, not a normalized path
        assert!(!has_track_extension("http://example.com/a.igc/"));
        assert!(has_track_extension("http://example.com/.igc"));
    }

    #[tokio::test]
    async fn test_ingest_rejects_invalid_input() {
        let source = FakeSource::new(vec![]);
        let (store, pipeline) = pipeline(source.clone());

        assert!(matches!(pipeline.ingest("").await, Err(IngestError::InvalidInput(_))));
        assert!(matches!(pipeline.ingest("   ").await, Err(IngestError::InvalidInput(_))));
        assert!(matches!(
            pipeline.ingest("http://example.com/flight.gpx").await,
            Err(IngestError::InvalidInput(_))
        ));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ingest_is_idempotent_per_url() {
        let source = FakeSource::new(vec![point(46.0, 7.0), point(46.1, 7.0)]);
        let (store, pipeline) = pipeline(source.clone());

        let first = pipeline.ingest("http://example.com/one.igc").await.unwrap();
        let second = pipeline.ingest("http://example.com/one.igc").await.unwrap();

        assert_eq!(first, 0);
        assert_eq!(second, 0);
        assert_eq!(store.count().unwrap(), 1);
        // Second call never re-fetched the file
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let record = store.get_by_id(0).unwrap();
        assert_eq!(record.pilot, "Ada");
        assert_eq!(record.flight_date, "2018-10-01");
        assert!((record.total_distance - point(46.0, 7.0).distance(&point(46.1, 7.0))).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_ingest_assigns_dense_ids() {
        let (store, pipeline) = pipeline(FakeSource::new(vec![]));
        for i in 0..5u64 {
            let id = pipeline.ingest(&format!("http://example.com/{}.igc", i)).await.unwrap();
            assert_eq!(id, i);
        }
        let ids: Vec<u64> = store.get_all().unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_ingest_surfaces_parse_failure() {
        let (store, pipeline) = pipeline(FakeSource::new(vec![]));
        let err = pipeline.ingest("http://example.com/broken.igc").await.unwrap_err();
        assert!(matches!(err, IngestError::ParseFailure(_)));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ingest_after_clear_restarts_at_zero() {
        let (store, pipeline) = pipeline(FakeSource::new(vec![]));
        pipeline.ingest("http://example.com/a.igc").await.unwrap();
        pipeline.ingest("http://example.com/b.igc").await.unwrap();
        assert_eq!(store.clear().unwrap(), 2);

        let id = pipeline.ingest("http://example.com/c.igc").await.unwrap();
        assert_eq!(id, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ingest_of_same_url() {
        let (store, pipeline) = pipeline(FakeSource::new(vec![point(1.0, 1.0), point(1.0, 2.0)]));
        let pipeline = Arc::new(pipeline);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move { pipeline.ingest("http://example.com/same.igc").await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 0);
        }
        assert_eq!(store.count().unwrap(), 1);
    }
}

//! Axum REST API server.
//!
//! Public routes live under `/paragliding/api`, administrative routes under
//! `/paragliding/admin/api`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::config::{Config, StoreBackend};
use crate::database::Database;
use crate::ingest::{IngestError, IngestPipeline};
use crate::models::{ApiInfo, PageResult, TrackField, TrackRecord};
use crate::parser::{HttpTrackSource, TrackSource};
use crate::store::{MemoryStore, StoreError, TrackStore};
use crate::ticker::{Ticker, TickerError};

/// Cursor keyword on `GET ticker/{cursor}` that returns only the newest timestamp
const LATEST_KEYWORD: &str = "latest";

/// Shared application state for Axum handlers
#[derive(Clone)]
pub struct WebAppState {
    pub store: Arc<dyn TrackStore>,
    pub ingest: Arc<IngestPipeline>,
    pub ticker: Arc<Ticker>,
    pub started_at: Instant,
}

impl WebAppState {
    pub fn new(store: Arc<dyn TrackStore>, source: Arc<dyn TrackSource>, page_size: usize) -> Self {
        Self {
            ingest: Arc::new(IngestPipeline::new(store.clone(), source)),
            ticker: Arc::new(Ticker::new(store.clone(), page_size)),
            store,
            started_at: Instant::now(),
        }
    }
}

/// Standard error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn err_response(status: StatusCode, msg: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: msg.into(),
        }),
    )
        .into_response()
}

/// Handler failure, mapped onto the status codes of the public API
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound,
    NoContent,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => err_response(StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound => StatusCode::NOT_FOUND.into_response(),
            ApiError::NoContent => StatusCode::NO_CONTENT.into_response(),
            ApiError::Internal(msg) => err_response(StatusCode::INTERNAL_SERVER_ERROR, msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => ApiError::NotFound,
            other => {
                log::error!("Storage failure: {}", other);
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::InvalidInput(msg) => ApiError::BadRequest(msg),
            e @ IngestError::ParseFailure(_) => ApiError::BadRequest(e.to_string()),
            IngestError::Storage(e) => e.into(),
        }
    }
}

impl From<TickerError> for ApiError {
    fn from(e: TickerError) -> Self {
        match e {
            TickerError::NoContent => ApiError::NoContent,
            TickerError::NotFound(_) => ApiError::NotFound,
            TickerError::Storage(e) => e.into(),
        }
    }
}

/// Format a duration as `P{y}Y{m}M{d}DT{h}H{m}M{s}S`.
///
/// Years are 365 days and months 30 days; each unit takes only what the
/// larger units left over.
pub fn fmt_iso8601_duration(duration: Duration) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;
    const MONTH: u64 = 30 * DAY;
    const YEAR: u64 = 365 * DAY;

    let mut rest = duration.as_secs();
    let years = rest / YEAR;
    rest %= YEAR;
    let months = rest / MONTH;
    rest %= MONTH;
    let days = rest / DAY;
    rest %= DAY;
    let hours = rest / HOUR;
    rest %= HOUR;
    let minutes = rest / MINUTE;
    let seconds = rest % MINUTE;

    format!(
        "P{}Y{}M{}DT{}H{}M{}S",
        years, months, days, hours, minutes, seconds
    )
}

fn parse_id(raw: &str) -> Result<u64, ApiError> {
    raw.parse::<u64>().map_err(|_| ApiError::NotFound)
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /paragliding/api — Service metadata and uptime
async fn api_info(AxumState(state): AxumState<WebAppState>) -> Json<ApiInfo> {
    Json(ApiInfo {
        uptime: fmt_iso8601_duration(state.started_at.elapsed()),
        info: "Service for Paragliding tracks.".to_string(),
        version: "v1".to_string(),
    })
}

#[derive(Deserialize)]
struct RegisterTrackPayload {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Serialize)]
struct RegisterTrackResponse {
    id: u64,
}

/// POST /paragliding/api/track — Ingest an IGC file by URL
async fn register_track(
    AxumState(state): AxumState<WebAppState>,
    payload: Result<Json<RegisterTrackPayload>, JsonRejection>,
) -> Result<Json<RegisterTrackResponse>, ApiError> {
    let url = match payload {
        Ok(Json(p)) => p.url.unwrap_or_default(),
        Err(rejection) => {
            log::warn!("Rejected track registration body: {}", rejection.body_text());
            return Err(ApiError::BadRequest("missing key 'url'".to_string()));
        }
    };

    let id = state.ingest.ingest(&url).await?;
    Ok(Json(RegisterTrackResponse { id }))
}

/// GET /paragliding/api/track — All track ids in insertion order
async fn list_track_ids(AxumState(state): AxumState<WebAppState>) -> Result<Json<Vec<u64>>, ApiError> {
    let count = state.store.count()?;
    Ok(Json((0..count).collect()))
}

/// GET /paragliding/api/track/:id — Full track summary
async fn get_track(
    AxumState(state): AxumState<WebAppState>,
    Path(id): Path<String>,
) -> Result<Json<TrackRecord>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.store.get_by_id(id)?))
}

/// GET /paragliding/api/track/:id/:field — Single field as plain text
async fn get_track_field(
    AxumState(state): AxumState<WebAppState>,
    Path((id, field)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let id = parse_id(&id)?;
    let field = TrackField::from_name(&field).ok_or(ApiError::NotFound)?;
    let track = state.store.get_by_id(id)?;
    Ok(track.field_text(field))
}

/// GET /paragliding/api/ticker — First ticker window
async fn ticker_first_page(AxumState(state): AxumState<WebAppState>) -> Result<Json<PageResult>, ApiError> {
    Ok(Json(state.ticker.page(None)?))
}

/// GET /paragliding/api/ticker/:cursor — Window from a timestamp, or the latest timestamp
async fn ticker_from_cursor(
    AxumState(state): AxumState<WebAppState>,
    Path(cursor): Path<String>,
) -> Result<Response, ApiError> {
    if cursor == LATEST_KEYWORD {
        return Ok(state.ticker.latest()?.into_response());
    }
    Ok(Json(state.ticker.page(Some(&cursor))?).into_response())
}

/// GET /paragliding/admin/api/tracks_count — Number of stored tracks
async fn tracks_count(AxumState(state): AxumState<WebAppState>) -> Result<String, ApiError> {
    Ok(state.store.count()?.to_string())
}

/// DELETE /paragliding/admin/api/tracks — Remove all tracks and reset ids
async fn delete_tracks(AxumState(state): AxumState<WebAppState>) -> Result<String, ApiError> {
    log::warn!("Deleting ALL tracks");
    let removed = state.store.clear()?;
    Ok(removed.to_string())
}

/// Build the Axum router with all API routes
pub fn build_router(state: WebAppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/paragliding/api", get(api_info))
        .route("/paragliding/api/track", get(list_track_ids).post(register_track))
        .route("/paragliding/api/track/:id", get(get_track))
        .route("/paragliding/api/track/:id/:field", get(get_track_field))
        .route("/paragliding/api/ticker", get(ticker_first_page))
        .route("/paragliding/api/ticker/:cursor", get(ticker_from_cursor))
        .route("/paragliding/admin/api/tracks_count", get(tracks_count))
        .route("/paragliding/admin/api/tracks", delete(delete_tracks))
        .layer(cors)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state)
}

/// Open the store selected by the config
pub fn open_store(config: &Config) -> Result<Arc<dyn TrackStore>, StoreError> {
    match config.backend {
        StoreBackend::DuckDb => {
            log::info!("Data directory: {:?}", config.data_dir);
            Ok(Arc::new(Database::new(config.data_dir.clone())?))
        }
        StoreBackend::Memory => {
            log::warn!("Using in-memory track store, tracks are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Start the Axum web server
pub async fn start_server(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let source = Arc::new(HttpTrackSource::new(config.fetch_timeout_secs)?);
    let state = WebAppState::new(store, source, config.page_size);

    let router = build_router(state);
    let addr = config.bind_addr();

    log::info!("Starting IGC Logbook server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_iso8601_duration_decomposes() {
        assert_eq!(fmt_iso8601_duration(Duration::from_secs(0)), "P0Y0M0DT0H0M0S");
        assert_eq!(fmt_iso8601_duration(Duration::from_secs(3_661)), "P0Y0M0DT1H1M1S");

        let day = 86_400;
        assert_eq!(fmt_iso8601_duration(Duration::from_secs(45 * day + 30)), "P0Y1M15DT0H0M30S");
        // 400 days: one year, then one month and five days remain
        assert_eq!(fmt_iso8601_duration(Duration::from_secs(400 * day)), "P1Y1M5DT0H0M0S");
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(ApiError::from(TickerError::NoContent), ApiError::NoContent));
        assert!(matches!(ApiError::from(TickerError::NotFound("x".into())), ApiError::NotFound));
        assert!(matches!(
            ApiError::from(IngestError::ParseFailure("bad".into())),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            ApiError::from(StoreError::Poisoned),
            ApiError::Internal(_)
        ));
        assert!(matches!(ApiError::from(StoreError::NotFound("7".into())), ApiError::NotFound));
    }
}

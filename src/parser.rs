//! Parser module for IGC flight track files.
//!
//! Handles:
//! - Fetching IGC files by URL with a bounded timeout
//! - Parsing `H` header records (date, pilot, glider type, glider id)
//! - Parsing `B` fix records into timestamped geographic points
//! - Great-circle distance between points

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;

/// Earth's mean radius in kilometres
const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Source returned HTTP {0}")]
    Status(u16),

    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Missing flight date header (HFDTE)")]
    MissingDate,

    #[error("Incompatible file format — not an IGC flight track")]
    IncompatibleFile,
}

/// One GNSS fix from a `B` record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub time: NaiveTime,
    pub latitude: f64,
    pub longitude: f64,
    /// Pressure altitude in metres
    pub pressure_alt: i32,
    /// GNSS altitude in metres
    pub gnss_alt: i32,
}

impl TrackPoint {
    /// Great-circle distance to `other` in kilometres
    pub fn distance(&self, other: &TrackPoint) -> f64 {
        haversine_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Header metadata and fixes extracted from one IGC file
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTrack {
    pub points: Vec<TrackPoint>,
    pub pilot: String,
    pub glider: String,
    pub glider_id: String,
    pub date: NaiveDate,
}

/// Something that turns a track URL into a parsed point sequence
#[async_trait]
pub trait TrackSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ParsedTrack, ParserError>;
}

/// Downloads IGC files over HTTP(S) and parses them
pub struct HttpTrackSource {
    client: reqwest::Client,
}

impl HttpTrackSource {
    pub fn new(timeout_secs: u64) -> Result<Self, ParserError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TrackSource for HttpTrackSource {
    async fn fetch(&self, url: &str) -> Result<ParsedTrack, ParserError> {
        let fetch_start = std::time::Instant::now();
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("Fetching {} returned HTTP {}", url, status);
            return Err(ParserError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        log::debug!(
            "Fetched {} ({:.1} KB) in {:.2}s",
            url,
            body.len() as f64 / 1024.0,
            fetch_start.elapsed().as_secs_f64()
        );

        parse_igc(&body)
    }
}

/// Parse the text of an IGC file.
///
/// Only the records needed for a track summary are interpreted; all other
/// record types (`I`, `L`, `G`, task declarations...) are skipped.
pub fn parse_igc(text: &str) -> Result<ParsedTrack, ParserError> {
    let mut saw_a_record = false;
    let mut date = None;
    let mut pilot = String::new();
    let mut glider = String::new();
    let mut glider_id = String::new();
    let mut points = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end();
        let line_no = idx + 1;

        if line.starts_with('A') {
            saw_a_record = true;
        } else if line.starts_with('B') {
            points.push(parse_fix(line, line_no)?);
        } else if let Some(rest) = line.strip_prefix('H') {
            // Second char is the data source (F = recorder, O = observer, P = pilot)
            let mut chars = rest.chars();
            chars.next();
            let body = chars.as_str();
            if body.len() < 3 || !body.is_char_boundary(3) {
                continue;
            }
            let (code, value) = body.split_at(3);
            match code {
                "DTE" => date = Some(parse_header_date(value, line_no)?),
                "PLT" => pilot = header_value(value),
                "GTY" => glider = header_value(value),
                "GID" => glider_id = header_value(value),
                _ => {}
            }
        }
    }

    if !saw_a_record && points.is_empty() {
        return Err(ParserError::IncompatibleFile);
    }

    let date = date.ok_or(ParserError::MissingDate)?;

    Ok(ParsedTrack {
        points,
        pilot,
        glider,
        glider_id,
        date,
    })
}

/// Strip the optional long-name prefix (`PILOTINCHARGE:`) from a header value
fn header_value(value: &str) -> String {
    match value.split_once(':') {
        Some((_, v)) => v.trim().to_string(),
        None => value.trim().to_string(),
    }
}

/// `HFDTE` comes as `DDMMYY` or `DATE:DDMMYY,NN`
fn parse_header_date(value: &str, line: usize) -> Result<NaiveDate, ParserError> {
    let value = header_value(value);
    let digits = value.split(',').next().unwrap_or("").trim();

    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParserError::Parse {
            line,
            message: format!("invalid HFDTE value '{}'", value),
        });
    }

    let day: u32 = digits[0..2].parse().unwrap_or(0);
    let month: u32 = digits[2..4].parse().unwrap_or(0);
    let year: i32 = digits[4..6].parse().unwrap_or(0);
    // Two-digit years: 80-99 are 19xx, the rest 20xx
    let year = if year >= 80 { 1900 + year } else { 2000 + year };

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| ParserError::Parse {
        line,
        message: format!("invalid date '{}'", digits),
    })
}

/// `B HHMMSS DDMMmmm N DDDMMmmm E V PPPPP GGGGG` (35 chars, extensions may follow)
fn parse_fix(line: &str, line_no: usize) -> Result<TrackPoint, ParserError> {
    let err = |message: &str| ParserError::Parse {
        line: line_no,
        message: message.to_string(),
    };

    if line.len() < 35 || !line.is_ascii() {
        return Err(err("B record shorter than 35 characters"));
    }

    let num = |range: std::ops::Range<usize>| -> Result<u32, ParserError> {
        line[range].parse::<u32>().map_err(|_| err("non-numeric field in B record"))
    };

    let time = NaiveTime::from_hms_opt(num(1..3)?, num(3..5)?, num(5..7)?)
        .ok_or_else(|| err("invalid fix time"))?;

    let lat_deg = num(7..9)? as f64;
    let lat_min = num(9..14)? as f64 / 1000.0;
    let mut latitude = lat_deg + lat_min / 60.0;
    match &line[14..15] {
        "N" => {}
        "S" => latitude = -latitude,
        _ => return Err(err("latitude hemisphere must be N or S")),
    }

    let lon_deg = num(15..18)? as f64;
    let lon_min = num(18..23)? as f64 / 1000.0;
    let mut longitude = lon_deg + lon_min / 60.0;
    match &line[23..24] {
        "E" => {}
        "W" => longitude = -longitude,
        _ => return Err(err("longitude hemisphere must be E or W")),
    }

    let alt = |range: std::ops::Range<usize>| -> Result<i32, ParserError> {
        line[range].parse::<i32>().map_err(|_| err("invalid altitude in B record"))
    };

    Ok(TrackPoint {
        time,
        latitude,
        longitude,
        pressure_alt: alt(25..30)?,
        gnss_alt: alt(30..35)?,
    })
}

/// Haversine distance calculation in kilometres
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

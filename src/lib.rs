pub mod config;
pub mod database;
pub mod ingest;
pub mod models;
pub mod parser;
pub mod server;
pub mod store;
pub mod ticker;

pub use config::Config;
pub use database::Database;
pub use ingest::IngestPipeline;
pub use models::*;
pub use parser::{HttpTrackSource, TrackSource};
pub use store::{MemoryStore, TrackStore};
pub use ticker::Ticker;

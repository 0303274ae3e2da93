//! IGC Logbook - Backend
//!
//! REST service that ingests IGC flight tracks by URL, stores a summary of
//! each track and serves them through a track API and a paginated ticker.
//!
//! Licensed under the GNU Affero General Public License v3.0. See the LICENSE file for details.

use igc_logbook_lib::{server, Config};

async fn run_web() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    log::info!(
        "Store backend: {:?}, ticker page size: {}",
        config.backend,
        config.page_size
    );

    if let Err(e) = server::start_server(config).await {
        log::error!("Server failed: {:#}", e);
        std::process::exit(1);
    }
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    runtime.block_on(run_web());
}

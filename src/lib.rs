pub mod config;
pub mod engine;
pub mod log;
pub mod providers;
pub mod quote;
pub mod quote_provider;
pub mod ui;

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::engine::{FormSnapshot, SyncEngine};

pub async fn run(config_path: Option<&str>) -> Result<()> {
    info!("Rate converter starting...");

    let config = match config_path {
        Some(path) => config::AppConfig::load_from_path(path)?,
        None => config::AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let provider = Arc::new(providers::http::HttpQuoteProvider::new(
        &config.quote_api.base_url,
    ));
    let handle = SyncEngine::spawn(provider, config.engine.timings(), FormSnapshot::default());

    ui::run_session(handle, &config.currencies).await
}

//! Logger initialization (console + file) and startup diagnostics.

use anyhow::Result;
use simplelog::*;

use crate::core::config::Config as AppConfig;

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file (truncated on start)
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file =
        fs_err::File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;

    let config = ConfigBuilder::new()
        .add_filter_ignore_str("hyper")
        .add_filter_ignore_str("reqwest")
        .build();

    CombinedLogger::init(vec![
        TermLogger::new(LevelFilter::Info, config.clone(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(LevelFilter::Info, config, log_file.into_parts().0),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs the resolved configuration at startup without exposing secrets.
pub fn log_startup_configuration(config: &AppConfig) {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("Store Hub configuration");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("database: {}", config.database_path);
    match &config.bot_api_url {
        Some(url) => log::info!("bot api: {}", url),
        None => log::info!("bot api: api.telegram.org"),
    }
    if config.admin_chat_ids.is_empty() {
        log::warn!("ADMIN_CHAT_IDS is empty: payment proofs will not reach anyone");
    } else {
        log::info!("admins: {}", config.admin_chat_ids.len());
    }
    match &config.force_join_channel {
        Some(channel) => log::info!("membership gate: {}", channel),
        None => log::info!("membership gate: disabled"),
    }
    log::info!(
        "workers: {} per bot, {} queued events max",
        config.worker_pool_size,
        config.max_pending_events
    );
    log::info!("session ttl: {}h", config.session_ttl.as_secs() / 3_600);
    log::info!("health check every {}s", config.health_check_interval.as_secs());
}

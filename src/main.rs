use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::ExposeSecret;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use storehub::cli::{Cli, Commands};
use storehub::core::{config, init_logger, log_startup_configuration, metrics, metrics_server, Config};
use storehub::dispatch::LaneLimits;
use storehub::mother::MotherDispatcher;
use storehub::router::mother::MotherSettings;
use storehub::router::{MotherHandler, Router, StorefrontHandler};
use storehub::session::{SessionStore, SqliteSessionBackend};
use storehub::source::Connector;
use storehub::storage::Database;
use storehub::supervisor::{HealthMonitor, RouterFactory, Supervisor, TenantHandle};
use storehub::telegram::{ChannelMembershipGate, MembershipGate, TelegramConnector};

/// Entry point
///
/// Parses CLI arguments and dispatches to the subcommand; `run` is the default.
///
/// # Errors
/// Returns an error if initialization fails (configuration, logging, database,
/// or opening the mother bot).
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Log panics from spawned handlers instead of losing them on stderr
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    // Load environment variables from .env if present
    let _ = dotenv();

    let config = Config::from_env()?;
    init_logger(&config.log_file_path)?;

    match cli.command {
        Some(Commands::Run) | None => run_hub(config).await,
        Some(Commands::Migrate) => {
            // Opening applies pending migrations
            Database::open(&config.database_path)?;
            log::info!("Database {} is up to date", config.database_path);
            Ok(())
        }
        Some(Commands::Tenants { active }) => list_tenants(&config, active),
    }
}

fn list_tenants(config: &Config, only_active: bool) -> Result<()> {
    let db = Database::open(&config.database_path)?;
    let stores = db.list_stores()?;
    for store in stores.iter().filter(|s| !only_active || s.is_active) {
        println!(
            "{:>5}  {:<24} {:<5} active={:<5} bot={:<9} @{}",
            store.id,
            store.name,
            store.plan.as_ref(),
            store.is_active,
            store.bot_status.as_ref(),
            store.bot_username.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn run_hub(config: Config) -> Result<()> {
    log_startup_configuration(&config);
    metrics::init_metrics();

    let db = Database::open(&config.database_path)?;
    let sessions = SessionStore::new(Arc::new(SqliteSessionBackend::new(db.clone())), config.session_ttl);
    let connector = Arc::new(TelegramConnector::new(config.bot_api_url.clone()));
    let limits = LaneLimits::from_config(&config);

    let mother = connector
        .open(&config.bot_token)
        .await
        .context("Failed to open the mother bot")?;
    let notifier = Arc::clone(&mother.outbound);

    let routers: RouterFactory = {
        let db = db.clone();
        let sessions = sessions.clone();
        Arc::new(move |tenant: &TenantHandle| {
            Router::new(
                Arc::new(StorefrontHandler::new(db.clone(), tenant.store_id)),
                sessions.clone(),
            )
        })
    };
    let supervisor = Supervisor::new(
        connector.clone(),
        Arc::new(db.clone()),
        routers,
        Arc::clone(&notifier),
        limits,
    );

    let handler = MotherHandler::new(db.clone(), supervisor.clone(), MotherSettings::from_config(&config));
    let router = Router::new(Arc::new(handler), sessions.clone());

    let gate = match &config.force_join_channel {
        Some(channel) => {
            let bot = connector.build_bot(config.bot_token.expose_secret())?;
            let gate: Arc<dyn MembershipGate> = Arc::new(ChannelMembershipGate::new(bot, channel));
            Some((gate, channel.clone()))
        }
        None => None,
    };
    let dispatcher = MotherDispatcher::new(mother, router, gate, limits, TaskTracker::new());

    match supervisor.start_all().await {
        Ok(report) if !report.failed.is_empty() => {
            log::warn!("{} store bots failed to start", report.failed.len());
        }
        Ok(_) => {}
        Err(e) => log::error!("Could not list tenants at boot: {}", e),
    }

    let cancel = CancellationToken::new();
    let health = HealthMonitor::new(supervisor.clone(), db.clone(), Arc::clone(&notifier))
        .spawn(config.health_check_interval, cancel.clone());
    let purge = sessions.spawn_purge_task(config::sessions::purge_interval(), cancel.clone());

    if config.metrics_enabled {
        let supervisor = supervisor.clone();
        let shutdown = cancel.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = metrics_server::start_metrics_server(port, supervisor, shutdown).await {
                log::error!("Metrics server error: {}", e);
            }
        });
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => log::info!("Shutdown requested"),
                Err(e) => log::error!("Failed to listen for ctrl-c: {}", e),
            }
            cancel.cancel();
        });
    }

    log::info!("Store Hub is running");
    let result = dispatcher.run(cancel.clone()).await;
    cancel.cancel();

    supervisor.shutdown().await;
    let _ = tokio::join!(health, purge);
    log::info!("Store Hub stopped");

    result.context("Mother bot receive loop failed")
}

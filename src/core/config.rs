//! Runtime configuration.
//!
//! `Config` is read once at startup (after `.env` is loaded) and handed to every
//! component that needs it. Fixed tuning knobs live in the nested modules below.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::core::error::{AppError, AppResult};

/// Long polling configuration
pub mod polling {
    use super::Duration;

    /// Seconds Telegram holds a `getUpdates` request open
    pub const TIMEOUT_SECS: u32 = 30;

    /// Extra slack on top of the poll timeout for the HTTP client
    pub const HTTP_SLACK_SECS: u64 = 15;

    /// Pause after a failed poll before trying again
    pub const ERROR_BACKOFF_MS: u64 = 2_000;

    pub fn http_timeout() -> Duration {
        Duration::from_secs(u64::from(TIMEOUT_SECS) + HTTP_SLACK_SECS)
    }

    pub fn error_backoff() -> Duration {
        Duration::from_millis(ERROR_BACKOFF_MS)
    }
}

/// Connection retry for opening a bot credential
pub mod connect {
    use super::Duration;

    pub const MAX_ATTEMPTS: usize = 3;
    pub const MIN_DELAY_MS: u64 = 500;
    pub const MAX_DELAY_MS: u64 = 5_000;

    pub fn min_delay() -> Duration {
        Duration::from_millis(MIN_DELAY_MS)
    }

    pub fn max_delay() -> Duration {
        Duration::from_millis(MAX_DELAY_MS)
    }
}

/// Channel membership gate
pub mod membership {
    use super::Duration;

    /// How long a positive or negative answer is cached per user
    pub const CACHE_TTL_SECS: u64 = 300;
    pub const CACHE_CAPACITY: u64 = 10_000;

    pub fn cache_ttl() -> Duration {
        Duration::from_secs(CACHE_TTL_SECS)
    }
}

/// Session housekeeping
pub mod sessions {
    use super::Duration;

    pub const PURGE_INTERVAL_SECS: u64 = 3_600;

    pub fn purge_interval() -> Duration {
        Duration::from_secs(PURGE_INTERVAL_SECS)
    }
}

/// Tenant supervision
pub mod supervisor {
    use super::Duration;

    /// How long shutdown waits for in-flight event handlers
    pub const SHUTDOWN_GRACE_SECS: u64 = 10;

    pub fn shutdown_grace() -> Duration {
        Duration::from_secs(SHUTDOWN_GRACE_SECS)
    }
}

/// Plan expiry reminders sent by the health check
pub mod reminders {
    /// Days before expiry at which the owner is reminded, largest first
    pub const DAYS_BEFORE_EXPIRY: [i64; 3] = [7, 3, 1];
}

/// Everything the process needs to boot, resolved from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: SecretString,
    pub bot_api_url: Option<url::Url>,
    pub database_path: String,
    pub log_file_path: String,
    pub admin_chat_ids: Vec<i64>,
    pub force_join_channel: Option<String>,
    pub payment_card_number: String,
    pub payment_card_holder: String,
    pub pro_plan_price: i64,
    pub vip_plan_price: i64,
    pub session_ttl: Duration,
    pub worker_pool_size: usize,
    pub max_pending_events: usize,
    pub health_check_interval: Duration,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Config {
    /// Reads the process environment.
    ///
    /// Fails only when the mother bot token is missing or a value is present
    /// but malformed; everything else falls back to a default.
    pub fn from_env() -> AppResult<Self> {
        let token = env::var("BOT_TOKEN")
            .or_else(|_| env::var("TELOXIDE_TOKEN"))
            .unwrap_or_default();
        if token.trim().is_empty() {
            return Err(AppError::Config("BOT_TOKEN (or TELOXIDE_TOKEN) is not set".to_string()));
        }

        let bot_api_url = match env::var("BOT_API_URL") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                url::Url::parse(raw.trim()).map_err(|e| AppError::Config(format!("BOT_API_URL: {}", e)))?,
            ),
            _ => None,
        };

        Ok(Self {
            bot_token: SecretString::from(token.trim().to_string()),
            bot_api_url,
            database_path: env_or("DATABASE_PATH", "storehub.sqlite"),
            log_file_path: env_or("LOG_FILE_PATH", "storehub.log"),
            admin_chat_ids: parse_id_list(&env_or("ADMIN_CHAT_IDS", ""))?,
            force_join_channel: env::var("FORCE_JOIN_CHANNEL").ok().filter(|s| !s.trim().is_empty()),
            payment_card_number: env_or("PAYMENT_CARD_NUMBER", "0000-0000-0000-0000"),
            payment_card_holder: env_or("PAYMENT_CARD_HOLDER", "Store Hub"),
            pro_plan_price: parse_env("PRO_PLAN_PRICE", 50_000)?,
            vip_plan_price: parse_env("VIP_PLAN_PRICE", 150_000)?,
            session_ttl: Duration::from_secs(parse_env::<u64>("SESSION_TTL_HOURS", 24)? * 3_600),
            worker_pool_size: parse_env::<usize>("WORKER_POOL_SIZE", 8)?.max(1),
            max_pending_events: parse_env::<usize>("MAX_PENDING_EVENTS", 256)?.max(1),
            health_check_interval: Duration::from_secs(parse_env("HEALTH_CHECK_INTERVAL_SECS", 1_800)?),
            metrics_enabled: parse_bool(&env_or("METRICS_ENABLED", "true")),
            metrics_port: parse_env("METRICS_PORT", 9090)?,
        })
    }

    pub fn is_admin(&self, chat_id: i64) -> bool {
        self.admin_chat_ids.contains(&chat_id)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> AppResult<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{}: {}", key, e))),
        _ => Ok(default),
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_id_list(raw: &str) -> AppResult<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|e| AppError::Config(format!("ADMIN_CHAT_IDS entry {:?}: {}", s, e)))
        })
        .collect()
}

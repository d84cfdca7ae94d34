use thiserror::Error;

/// Centralized error type for the business layer and process wiring.
///
/// Component-specific failures (`SessionError`, `SourceError`,
/// `SupervisorError`) convert into this when they cross into handlers.
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database connection pool errors
    #[error("Database pool error: {0}")]
    DatabasePool(#[from] r2d2::Error),

    /// Schema migration failures
    #[error("Migration error: {0}")]
    Migration(String),

    /// Telegram API errors
    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or malformed environment configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session store failures other than corrupt payloads
    #[error("Session error: {0}")]
    Session(#[from] crate::session::SessionError),

    /// Tenant lifecycle errors
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] crate::supervisor::SupervisorError),

    /// Outbound delivery failures
    #[error("Outbound error: {0}")]
    Outbound(#[from] crate::telegram::OutboundError),

    /// A referenced row does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

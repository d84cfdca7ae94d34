//! Core utilities, configuration, and common functionality

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod metrics_server;
pub mod plan;
pub mod types;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use logging::{init_logger, log_startup_configuration};
pub use plan::{PlanCatalog, PlanLimits, PlanType};
pub use types::{InboundEvent, StoreId};

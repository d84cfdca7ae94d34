//! Store Hub - a Telegram platform that lets merchants run their own store bots
//!
//! One mother bot handles registration, plan payments and store management.
//! Every registered store gets its own bot, run by the supervisor inside the
//! same process.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, metrics, plans and shared types
//! - `storage`: SQLite business entities and migrations
//! - `session` / `flow`: per-user conversation state and the flows driving it
//! - `router`: turns an inbound event into replies, for the mother bot and storefronts
//! - `dispatch`: receive loops and per-user ordered event processing
//! - `supervisor`: lifecycle of the tenant bots
//! - `telegram`: Telegram transport, membership gate and message texts

pub mod cli;
pub mod core;
pub mod dispatch;
pub mod flow;
pub mod mother;
pub mod router;
pub mod session;
pub mod source;
pub mod storage;
pub mod supervisor;
pub mod telegram;
pub mod testing;

// Re-export commonly used types for convenience
pub use core::{config, AppError, AppResult, Config};
pub use storage::Database;
pub use supervisor::{Supervisor, SupervisorError, TenantStatus};

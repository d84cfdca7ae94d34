//! Telegram adapter: long polling, replies, the membership gate and texts.

pub mod membership;
pub mod messages;
pub mod outbound;
pub mod polling;

pub use membership::{AllowAll, ChannelMembershipGate, MembershipGate};
pub use outbound::{Outbound, OutboundError, TelegramOutbound};
pub use polling::{TelegramConnector, TelegramUpdateSource};

//! From a source's receive loop to delivered replies.

pub mod lanes;
pub mod pipeline;
pub mod poller;

pub use lanes::{KeyedLanes, LaneLimits};
pub use pipeline::{deliver, EventPipeline, GatePolicy};
pub use poller::run_poll_loop;

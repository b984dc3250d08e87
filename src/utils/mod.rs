//! # Utility Modules
//!
//! Supporting utilities for logging, timing, metrics, and token generation.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` installation from configuration
//! - **Metrics**: thread-safe observability counters
//! - **Time**: unix-millisecond timestamp helpers
//! - **Timeout**: protocol timing defaults and an async timeout wrapper
//! - **Unique**: collision-checked session token generation

pub mod logging;
pub mod metrics;
pub mod time;
pub mod timeout;
pub mod unique;

pub use metrics::{MetricsSnapshot, TransportMetrics};
pub use unique::UniqueTokenGenerator;

//! # Protocol Layer
//!
//! Built-in message types and the reason enums delivered with
//! connect/disconnect events.

pub mod message;

pub use message::{
    register_builtin_messages, ConnectionMessage, DataMessage, DisconnectReason, RejectReason,
};

// test-only module included via protocol/mod.rs
#[cfg(test)]
mod tests;

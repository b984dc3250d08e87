//! # Error Types
//!
//! Error handling for the polling transport and its binary codec.
//!
//! This module defines all error variants that can occur during protocol
//! operations, from codec framing failures to session-lifecycle problems.
//!
//! ## Error Categories
//! - **Framing errors**: buffer underflow, unknown type tags, bad payloads.
//!   Fatal to the single value being decoded, never to the session.
//! - **Protocol errors**: unknown tokens, rejected connections. Mapped to an
//!   HTTP status on the wire and handled by the caller.
//! - **Transport errors**: request failures and timeouts. Each poll tick is
//!   an independent retry until the configured disconnect window elapses.
//! - **Configuration errors**: invalid or unreadable configuration.
//!
//! All errors implement `std::error::Error` for interoperability.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common cases.
pub mod constants {
    /// Body returned by the server when a token is not registered.
    pub const ERR_UNKNOWN_TOKEN: &str = "Unknown token";
    /// Status reason attached to a duplicate-session rejection.
    pub const ERR_ACTIVE_SESSION: &str = "An active peer has been found";
    /// Body returned by the server when a disconnect is acknowledged.
    pub const ACK_DISCONNECT: &str = "Disconnect received";

    /// Registry lock errors
    pub const ERR_REGISTRY_READ_LOCK: &str = "Failed to acquire read lock on codec registry";
    pub const ERR_REGISTRY_WRITE_LOCK: &str = "Failed to acquire write lock on codec registry";

    /// Queue/state lock errors
    pub const ERR_STATE_LOCK: &str = "Failed to acquire session state lock";
}

/// ProtocolError is the primary error type for all transport operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("buffer underflow: needed {needed} bytes, {remaining} remaining")]
    Underflow { needed: usize, remaining: usize },

    #[error("unknown type code {0:#06x}")]
    UnknownTypeCode(u16),

    #[error("unknown type name: {0}")]
    UnknownTypeName(String),

    #[error("type code collision: {existing} and {incoming} both map to {code:#06x}")]
    CodeCollision {
        code: u16,
        existing: &'static str,
        incoming: &'static str,
    },

    #[error("type not registered: {0}")]
    NotRegistered(&'static str),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("connection rejected: {0}")]
    Rejected(String),

    #[error("unknown session token")]
    UnknownToken,

    #[error("not connected")]
    NotConnected,

    #[error("operation timed out")]
    Timeout,

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("custom error: {0}")]
    Custom(String),
}

impl From<reqwest::Error> for ProtocolError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProtocolError::Timeout
        } else {
            ProtocolError::Http(err.to_string())
        }
    }
}

impl From<url::ParseError> for ProtocolError {
    fn from(err: url::ParseError) -> Self {
        ProtocolError::InvalidUrl(err.to_string())
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

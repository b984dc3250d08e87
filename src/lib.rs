//! # HTTP Transport
//!
//! Message-oriented session transport tunneled over plain request/response
//! HTTP calls, plus the binary codec that serializes the messages exchanged
//! on that tunnel.
//!
//! Two endpoints that cannot hold a persistent socket (behind restrictive
//! proxies, for instance) exchange ordered batches of typed messages by
//! repeated short polling, while the API presents
//! connect/disconnect/send/receive semantics resembling a session
//! transport.
//!
//! ## Features
//! - **Binary codec**: type-indexed serialization with a registry mapping
//!   types to short numeric codes, so type names are not repeated on the
//!   wire
//! - **Session tokens**: opaque unique tokens identify each server-side
//!   peer; at most one live session per remote address
//! - **Batched polling**: each poll cycle flushes the outbound queue into
//!   one batch and delivers the reply batch in order
//! - **Idle expiry**: a periodic sweep evicts peers that stop calling in,
//!   with separate grace and steady-state windows
//! - **Event channels**: connect/message/disconnect notifications are
//!   typed events on channels, never reentrant callbacks
//!
//! ## Quick Start
//! ```no_run
//! use std::sync::Arc;
//!
//! use http_transport::config::{ClientConfig, ServerConfig};
//! use http_transport::core::CodecRegistry;
//! use http_transport::transport::{TransportClient, TransportServer};
//!
//! #[tokio::main]
//! async fn main() -> http_transport::Result<()> {
//!     let registry = Arc::new(CodecRegistry::new());
//!
//!     let (server, _server_events) =
//!         TransportServer::new(registry.clone(), ServerConfig::default())?;
//!     let addr = server.start("127.0.0.1:0").await?;
//!
//!     let (client, _client_events) =
//!         TransportClient::new(registry, ClientConfig::default())?;
//!     client.connect(&format!("http://{addr}")).await?;
//!
//!     client.send(Box::new(String::from("hello")));
//!     client.disconnect().await;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Wire Format
//! Every top-level payload is `[null-flag:1][type-tag][payload]`, where the
//! tag is either `0x00` plus a 16-bit registry code or `0x01` plus a
//! length-prefixed type name. Collections are `[count:4][item]*count`.

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::config::{ClientConfig, LoggingConfig, ServerConfig, TransportConfig};
pub use crate::core::{
    CodecRegistry, Message, ObjectReader, ObjectWriter, ReadBuffer, Wire, WriteBuffer,
};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::{ConnectionMessage, DataMessage, DisconnectReason, RejectReason};
pub use crate::transport::{ClientEvent, Peer, ServerEvent, TransportClient, TransportServer};

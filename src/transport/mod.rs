//! # Polling Transport
//!
//! The connect/data/disconnect state machine on both sides of the tunnel.
//!
//! ## Components
//! - **Peer**: server-side session record with its outbound queue and
//!   heartbeat bookkeeping
//! - **Server**: peer registry, protocol endpoints, idle sweep
//! - **Client**: connect handshake, fixed-interval poll loop, failure
//!   window
//!
//! Both sides surface lifecycle changes and inbound messages as typed
//! events on unbounded channels rather than callbacks, so delivery happens
//! on the transport's own tasks and can never re-enter the caller.

pub mod client;
pub mod peer;
pub mod server;

pub use client::{ClientEvent, TransportClient};
pub use peer::Peer;
pub use server::{ServerEvent, TransportServer};

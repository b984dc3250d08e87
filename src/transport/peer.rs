//! # Peer State
//!
//! One record per connected remote endpoint on the server side.
//!
//! A peer owns its session token, the remote address observed at connect
//! time, an outbound message queue drained into the next `/data` reply, and
//! the heartbeat bookkeeping the sweep uses to evict idle sessions.
//!
//! The queue is single-producer (application `send`) / single-consumer
//! (the `/data` handler) and needs no coordination beyond its own lock;
//! peers never lock each other.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use tracing::debug;

use crate::core::object::Message;

#[derive(Debug)]
struct PeerInner {
    queue: VecDeque<Box<dyn Message>>,
    /// `None` until the first `/data` call lands.
    last_update: Option<Instant>,
    latency: Duration,
}

/// Server-side record of one connected remote endpoint.
#[derive(Debug)]
pub struct Peer {
    token: String,
    remote: SocketAddr,
    connected_at: Instant,
    inner: Mutex<PeerInner>,
}

impl Peer {
    pub(crate) fn new(token: String, remote: SocketAddr) -> Self {
        Self {
            token,
            remote,
            connected_at: Instant::now(),
            inner: Mutex::new(PeerInner {
                queue: VecDeque::new(),
                last_update: None,
                latency: Duration::ZERO,
            }),
        }
    }

    /// The opaque token identifying this session.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The remote address observed when the session was accepted.
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Last measured round-trip latency (arrival minus the batch's embedded
    /// send timestamp). Zero until the first `/data` call.
    pub fn latency(&self) -> Duration {
        self.inner
            .lock()
            .map(|inner| inner.latency)
            .unwrap_or(Duration::ZERO)
    }

    /// How long this peer has been connected.
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Queue a message for the peer's next poll cycle.
    pub fn send(&self, message: Box<dyn Message>) {
        debug!(
            token = %self.token,
            message_type = message.message_type_name(),
            "Queued message"
        );
        if let Ok(mut inner) = self.inner.lock() {
            inner.queue.push_back(message);
        }
    }

    /// Number of messages waiting for the next poll cycle.
    pub fn queued(&self) -> usize {
        self.inner.lock().map(|inner| inner.queue.len()).unwrap_or(0)
    }

    /// Stamp a `/data` arrival: refresh the heartbeat and derive latency
    /// from the batch's send timestamp.
    pub(crate) fn touch(&self, sent: SystemTime) {
        let latency = SystemTime::now()
            .duration_since(sent)
            .unwrap_or(Duration::ZERO);
        if let Ok(mut inner) = self.inner.lock() {
            inner.last_update = Some(Instant::now());
            inner.latency = latency;
        }
    }

    /// Drain the outbound queue into a reply batch, oldest first.
    pub(crate) fn drain_outbound(&self) -> Vec<Box<dyn Message>> {
        match self.inner.lock() {
            Ok(mut inner) => inner.queue.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Whether the sweep should evict this peer: a never-updated peer
    /// expires after `grace`, an updated one after `idle` of silence.
    pub(crate) fn is_expired(&self, grace: Duration, idle: Duration) -> bool {
        let last_update = self.inner.lock().map(|inner| inner.last_update).unwrap_or(None);
        match last_update {
            None => self.connected_at.elapsed() >= grace,
            Some(at) => at.elapsed() >= idle,
        }
    }
}

//! # Transport Server
//!
//! Owns the peer registry, the three protocol endpoints, and the periodic
//! sweep that expires idle peers.
//!
//! The endpoints are plain `POST` routes on an axum router:
//! - `/connect`: accept a new session (403 + rejection message when the
//!   caller's address already owns a live peer)
//! - `/data?token=`: exchange one batch each way (403 "Unknown token" for
//!   unregistered tokens)
//! - `/disconnect?token=`: tear the session down (plain-text ack)
//!
//! Lifecycle notifications (`Connected`, `Message`, `Disconnected`, errors)
//! are delivered as [`ServerEvent`]s on an unbounded channel; they are sent
//! from the request and sweep tasks, never reentrant into the caller.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::core::object::{Message, ObjectReader, ObjectWriter};
use crate::core::registry::CodecRegistry;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{
    register_builtin_messages, ConnectionMessage, DataMessage, DisconnectReason, RejectReason,
};
use crate::transport::peer::Peer;
use crate::utils::metrics::{MetricsSnapshot, TransportMetrics};
use crate::utils::unique::UniqueTokenGenerator;

/// Notifications emitted by a [`TransportServer`].
#[derive(Debug)]
pub enum ServerEvent {
    /// The server is bound and accepting requests.
    Started { local_addr: SocketAddr },
    /// The server has shut down.
    Stopped,
    /// A new session was accepted.
    Connected(Arc<Peer>),
    /// A message arrived from a peer.
    Message {
        peer: Arc<Peer>,
        message: Box<dyn Message>,
    },
    /// A session ended.
    Disconnected {
        peer: Arc<Peer>,
        reason: DisconnectReason,
    },
    /// A request failed outside the normal protocol flow.
    Error(ProtocolError),
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: String,
}

enum ConnectOutcome {
    Accepted(Arc<Peer>),
    Rejected(RejectReason),
}

struct ServerShared {
    peers: DashMap<String, Arc<Peer>>,
    tokens: UniqueTokenGenerator,
    registry: Arc<CodecRegistry>,
    config: ServerConfig,
    events: mpsc::UnboundedSender<ServerEvent>,
    metrics: TransportMetrics,
    /// Serializes the duplicate-address check with the insert so two
    /// racing connects can never both be accepted.
    accept_lock: Mutex<()>,
}

impl ServerShared {
    fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    /// Decide a connect request: at most one live session per remote
    /// address is an invariant, not a policy.
    fn accept_or_reject(&self, remote: SocketAddr) -> ConnectOutcome {
        let _guard = match self.accept_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if self.find_by_addr(remote).is_some() {
            self.metrics.record_rejection();
            info!(%remote, "Rejected peer (active session)");
            return ConnectOutcome::Rejected(RejectReason::ActiveSession);
        }

        let token = self.tokens.next();
        let peer = Arc::new(Peer::new(token.clone(), remote));
        self.peers.insert(token.clone(), peer.clone());
        self.metrics.record_connection();

        info!(%remote, token = %token, "Accepted peer");
        self.emit(ServerEvent::Connected(peer.clone()));
        ConnectOutcome::Accepted(peer)
    }

    fn find_by_addr(&self, addr: SocketAddr) -> Option<Arc<Peer>> {
        self.peers
            .iter()
            .find(|entry| entry.value().remote() == addr)
            .map(|entry| entry.value().clone())
    }

    fn remove_peer(&self, token: &str, reason: DisconnectReason) -> Option<Arc<Peer>> {
        let (_, peer) = self.peers.remove(token)?;
        self.tokens.free(token);
        self.metrics.record_disconnection();
        if reason == DisconnectReason::TimedOut {
            self.metrics.record_timeout();
        }

        info!(token = %token, %reason, "Peer disconnected");
        self.emit(ServerEvent::Disconnected {
            peer: peer.clone(),
            reason,
        });
        Some(peer)
    }

    /// One sweep pass: evict every peer whose window has elapsed.
    fn sweep(&self) {
        let expired: Vec<String> = self
            .peers
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .is_expired(self.config.connect_grace, self.config.disconnect_delay)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for token in expired {
            self.remove_peer(&token, DisconnectReason::TimedOut);
        }
    }

    fn encode_top(&self, message: &dyn Message) -> Result<Vec<u8>> {
        let mut writer = ObjectWriter::new(&self.registry);
        writer.put_message(message)?;
        Ok(writer.finish())
    }
}

/// Polling transport server.
///
/// Accepts sessions, exchanges message batches with polling clients, and
/// evicts peers that stop calling in.
pub struct TransportServer {
    shared: Arc<ServerShared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl TransportServer {
    /// Create a server and the receiving end of its event channel.
    ///
    /// Registers the built-in message types on `registry`.
    pub fn new(
        registry: Arc<CodecRegistry>,
        config: ServerConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>)> {
        register_builtin_messages(&registry)?;
        let (events, events_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(ServerShared {
            peers: DashMap::new(),
            tokens: UniqueTokenGenerator::new(config.token_length),
            registry,
            config,
            events,
            metrics: TransportMetrics::new(),
            accept_lock: Mutex::new(()),
        });

        Ok((
            Self {
                shared,
                tasks: Mutex::new(Vec::new()),
                shutdown: Mutex::new(None),
                local_addr: Mutex::new(None),
            },
            events_rx,
        ))
    }

    /// Bind `bind` and start serving the protocol endpoints plus the sweep.
    ///
    /// Returns the bound local address (useful with port 0). A server that
    /// is already listening is stopped first.
    pub async fn start(&self, bind: &str) -> Result<SocketAddr> {
        if self.is_listening() {
            self.stop().await;
        }

        let listener = TcpListener::bind(bind).await?;
        let local_addr = listener.local_addr()?;

        let app = Router::new()
            .route("/connect", post(connect_route))
            .route("/data", post(data_route))
            .route("/disconnect", post(disconnect_route))
            .with_state(self.shared.clone());

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let serve_shared = self.shared.clone();
        let serve_task = tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await;

            if let Err(e) = result {
                error!(error = %e, "Server loop failed");
                serve_shared.emit(ServerEvent::Error(ProtocolError::Io(e)));
            }
        });

        let sweep_shared = self.shared.clone();
        let sweep_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_shared.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sweep_shared.sweep();
            }
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(serve_task);
            tasks.push(sweep_task);
        }
        if let Ok(mut shutdown) = self.shutdown.lock() {
            *shutdown = Some(shutdown_tx);
        }
        if let Ok(mut addr) = self.local_addr.lock() {
            *addr = Some(local_addr);
        }

        info!(%local_addr, "Transport server listening");
        self.shared.emit(ServerEvent::Started { local_addr });
        Ok(local_addr)
    }

    /// Stop serving and force-disconnect every peer.
    ///
    /// Safe to call from any state; never blocks on in-flight requests.
    pub async fn stop(&self) {
        let shutdown = self.shutdown.lock().ok().and_then(|mut s| s.take());
        let was_listening = shutdown.is_some();
        if let Some(tx) = shutdown {
            let _ = tx.send(true);
        }

        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        if let Ok(mut addr) = self.local_addr.lock() {
            *addr = None;
        }

        let tokens: Vec<String> = self
            .shared
            .peers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for token in tokens {
            self.shared.remove_peer(&token, DisconnectReason::Forced);
        }
        self.shared.tokens.free_all();

        if was_listening {
            info!("Transport server stopped");
            self.shared.emit(ServerEvent::Stopped);
        }
    }

    /// Whether the server is currently bound.
    pub fn is_listening(&self) -> bool {
        self.local_addr
            .lock()
            .map(|addr| addr.is_some())
            .unwrap_or(false)
    }

    /// The bound address, when listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }

    /// Look a peer up by its session token.
    pub fn try_get_peer(&self, token: &str) -> Option<Arc<Peer>> {
        self.shared.peers.get(token).map(|entry| entry.value().clone())
    }

    /// Look a peer up by its remote address.
    pub fn try_get_peer_by_addr(&self, addr: SocketAddr) -> Option<Arc<Peer>> {
        self.shared.find_by_addr(addr)
    }

    /// Queue a message for the peer owning `token`.
    pub fn send(&self, token: &str, message: Box<dyn Message>) -> Result<()> {
        let peer = self.try_get_peer(token).ok_or(ProtocolError::UnknownToken)?;
        peer.send(message);
        Ok(())
    }

    /// Queue one message per connected peer, built by `make`.
    pub fn broadcast<F>(&self, make: F)
    where
        F: Fn() -> Box<dyn Message>,
    {
        for entry in self.shared.peers.iter() {
            entry.value().send(make());
        }
    }

    /// Number of live peers.
    pub fn peer_count(&self) -> usize {
        self.shared.peers.len()
    }

    /// Point-in-time copy of the server's counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Force-disconnect a peer by token.
    pub fn disconnect_peer(&self, token: &str) -> Option<Arc<Peer>> {
        self.shared.remove_peer(token, DisconnectReason::Forced)
    }
}

async fn connect_route(
    State(shared): State<Arc<ServerShared>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Response {
    let (status, message) = match shared.accept_or_reject(remote) {
        ConnectOutcome::Accepted(peer) => (
            StatusCode::OK,
            ConnectionMessage::Accepted {
                token: peer.token().to_string(),
                poll_delay: shared.config.disconnect_delay,
            },
        ),
        ConnectOutcome::Rejected(reason) => {
            (StatusCode::FORBIDDEN, ConnectionMessage::Rejected { reason })
        }
    };

    match shared.encode_top(&message) {
        Ok(body) => (status, body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode connect reply");
            shared.emit(ServerEvent::Error(e));
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn data_route(
    State(shared): State<Arc<ServerShared>>,
    Query(query): Query<TokenQuery>,
    body: Bytes,
) -> Response {
    let Some(peer) = shared
        .peers
        .get(&query.token)
        .map(|entry| entry.value().clone())
    else {
        warn!(token = %query.token, "Data request for unknown token");
        return (StatusCode::FORBIDDEN, constants::ERR_UNKNOWN_TOKEN).into_response();
    };

    let received_bytes = body.len() as u64;
    let mut reader = ObjectReader::new(&shared.registry, body);
    let batch: DataMessage = match reader.take_message() {
        Ok(batch) => batch,
        Err(e) => {
            // Fatal to this request only; the session stays up.
            warn!(token = %query.token, error = %e, "Failed to decode data batch");
            shared.emit(ServerEvent::Error(e));
            return (StatusCode::BAD_REQUEST, "Malformed data batch").into_response();
        }
    };

    peer.touch(batch.sent);
    shared
        .metrics
        .record_received(batch.messages.len() as u64, received_bytes);
    debug!(
        token = %query.token,
        count = batch.messages.len(),
        latency_ms = peer.latency().as_millis() as u64,
        "Received update"
    );

    for message in batch.messages {
        shared.emit(ServerEvent::Message {
            peer: peer.clone(),
            message,
        });
    }

    let outbound = peer.drain_outbound();
    debug!(token = %query.token, count = outbound.len(), "Sending batch");
    let reply = DataMessage::new(outbound);

    match shared.encode_top(&reply) {
        Ok(body) => {
            shared
                .metrics
                .record_sent(reply.messages.len() as u64, body.len() as u64);
            (StatusCode::OK, body).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to encode data reply");
            shared.emit(ServerEvent::Error(e));
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn disconnect_route(
    State(shared): State<Arc<ServerShared>>,
    Query(query): Query<TokenQuery>,
) -> Response {
    if shared
        .remove_peer(&query.token, DisconnectReason::Requested)
        .is_none()
    {
        warn!(token = %query.token, "Disconnect request for unknown token");
        return (StatusCode::FORBIDDEN, constants::ERR_UNKNOWN_TOKEN).into_response();
    }

    (StatusCode::OK, constants::ACK_DISCONNECT).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_with(
        config: ServerConfig,
    ) -> (Arc<ServerShared>, mpsc::UnboundedReceiver<ServerEvent>) {
        let registry = Arc::new(CodecRegistry::new());
        register_builtin_messages(&registry).unwrap();
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Arc::new(ServerShared {
                peers: DashMap::new(),
                tokens: UniqueTokenGenerator::new(15),
                registry,
                config,
                events,
                metrics: TransportMetrics::new(),
                accept_lock: Mutex::new(()),
            }),
            events_rx,
        )
    }

    fn shared() -> (Arc<ServerShared>, mpsc::UnboundedReceiver<ServerEvent>) {
        shared_with(ServerConfig::default())
    }

    #[test]
    fn duplicate_address_is_rejected() {
        let (shared, mut events) = shared();
        let addr: SocketAddr = "10.0.0.1:5000".parse().unwrap();

        let first = shared.accept_or_reject(addr);
        let second = shared.accept_or_reject(addr);

        assert!(matches!(first, ConnectOutcome::Accepted(_)));
        assert!(matches!(
            second,
            ConnectOutcome::Rejected(RejectReason::ActiveSession)
        ));
        assert_eq!(shared.peers.len(), 1);
        assert_eq!(shared.metrics.snapshot().connections_rejected, 1);

        // Exactly one Connected event.
        assert!(matches!(events.try_recv(), Ok(ServerEvent::Connected(_))));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn distinct_addresses_each_get_a_peer() {
        let (shared, _events) = shared();
        let a = shared.accept_or_reject("10.0.0.1:5000".parse().unwrap());
        let b = shared.accept_or_reject("10.0.0.2:5000".parse().unwrap());
        assert!(matches!(a, ConnectOutcome::Accepted(_)));
        assert!(matches!(b, ConnectOutcome::Accepted(_)));
        assert_eq!(shared.peers.len(), 2);
    }

    #[test]
    fn disconnect_frees_the_address_and_token() {
        let (shared, mut events) = shared();
        let addr: SocketAddr = "10.0.0.1:5000".parse().unwrap();

        let ConnectOutcome::Accepted(peer) = shared.accept_or_reject(addr) else {
            panic!("expected acceptance");
        };
        let token = peer.token().to_string();

        assert!(shared.remove_peer(&token, DisconnectReason::Requested).is_some());
        assert!(shared.remove_peer(&token, DisconnectReason::Requested).is_none());
        assert_eq!(shared.tokens.issued_count(), 0);

        // The address may connect again.
        assert!(matches!(
            shared.accept_or_reject(addr),
            ConnectOutcome::Accepted(_)
        ));

        let mut reasons = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ServerEvent::Disconnected { reason, .. } = event {
                reasons.push(reason);
            }
        }
        assert_eq!(reasons, [DisconnectReason::Requested]);
    }

    #[test]
    fn broadcast_queues_one_message_per_peer() {
        let (shared, _events) = shared();
        let ConnectOutcome::Accepted(a) = shared.accept_or_reject("10.0.0.1:1111".parse().unwrap())
        else {
            panic!("expected acceptance");
        };
        let ConnectOutcome::Accepted(b) = shared.accept_or_reject("10.0.0.2:2222".parse().unwrap())
        else {
            panic!("expected acceptance");
        };

        let server = TransportServer {
            shared: shared.clone(),
            tasks: Mutex::new(Vec::new()),
            shutdown: Mutex::new(None),
            local_addr: Mutex::new(None),
        };
        server.broadcast(|| Box::new(String::from("ping")));

        assert_eq!(a.queued(), 1);
        assert_eq!(b.queued(), 1);
        assert!(server
            .try_get_peer_by_addr("10.0.0.1:1111".parse().unwrap())
            .is_some());
        assert!(server.try_get_peer(a.token()).is_some());
        assert!(matches!(
            server.send("no-such-token", Box::new(String::from("x"))),
            Err(ProtocolError::UnknownToken)
        ));
    }

    #[test]
    fn sweep_evicts_only_expired_peers() {
        let mut config = ServerConfig::default();
        config.disconnect_delay = std::time::Duration::from_millis(10);
        let (shared, mut events) = shared_with(config);

        let fresh = shared.accept_or_reject("10.0.0.1:1111".parse().unwrap());
        let ConnectOutcome::Accepted(stale) =
            shared.accept_or_reject("10.0.0.2:2222".parse().unwrap())
        else {
            panic!("expected acceptance");
        };
        assert!(matches!(fresh, ConnectOutcome::Accepted(_)));

        // The stale peer has polled once and then gone silent longer than
        // the steady-state window; the fresh one is still inside its
        // connect grace.
        stale.touch(std::time::SystemTime::now());
        std::thread::sleep(std::time::Duration::from_millis(30));

        shared.sweep();
        assert_eq!(shared.peers.len(), 1);

        let mut timed_out = 0;
        while let Ok(event) = events.try_recv() {
            if let ServerEvent::Disconnected {
                reason: DisconnectReason::TimedOut,
                ..
            } = event
            {
                timed_out += 1;
            }
        }
        assert_eq!(timed_out, 1);
    }
}

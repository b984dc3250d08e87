//! # Transport Client
//!
//! One outbound polling session against a transport server.
//!
//! `connect` performs the handshake and, on acceptance, starts a
//! fixed-period poll task at half the server's recommended delay. Each
//! tick drains the outbound queue into one `DataMessage`, posts it to
//! `/data`, and dispatches every message in the reply as a
//! [`ClientEvent`]. Only one request is ever in flight; a tick that would
//! overlap is skipped, which is the transport's natural backpressure.
//!
//! Failures are tolerated tick by tick. Once the last successful exchange
//! is older than the configured disconnect delay, or the server answers
//! 403 for the token, the session is forced to `Disconnected` and an
//! error event is raised.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::core::object::{Message, ObjectReader, ObjectWriter};
use crate::core::registry::CodecRegistry;
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{
    register_builtin_messages, ConnectionMessage, DataMessage, RejectReason,
};
use crate::utils::metrics::{MetricsSnapshot, TransportMetrics};

/// Notifications emitted by a [`TransportClient`].
#[derive(Debug)]
pub enum ClientEvent {
    /// The handshake was accepted.
    Connected {
        token: String,
        poll_delay: Duration,
    },
    /// The server refused the handshake.
    Rejected(RejectReason),
    /// The handshake failed before the server could answer.
    ConnectionFailed(String),
    /// A message arrived in a poll reply.
    Message(Box<dyn Message>),
    /// The session ended.
    Disconnected,
    /// The session was forced down by repeated failures.
    Error(ProtocolError),
}

/// Client-side session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug)]
struct ClientState {
    phase: Phase,
    base_url: Option<String>,
    token: Option<String>,
    last_success: Option<Instant>,
    latency: Duration,
}

struct ClientShared {
    http: reqwest::Client,
    registry: Arc<CodecRegistry>,
    config: ClientConfig,
    state: Mutex<ClientState>,
    queue: Mutex<VecDeque<Box<dyn Message>>>,
    /// One request in flight at a time; overlapping ticks are skipped.
    waiting: AtomicBool,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    events: mpsc::UnboundedSender<ClientEvent>,
    metrics: TransportMetrics,
}

impl ClientShared {
    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ClientState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn endpoint(&self, base: &str, name: &str) -> String {
        format!("{}/{name}", base.trim_end_matches('/'))
    }

    /// Tear the session down locally. Emits at most one `Disconnected`
    /// event per established session.
    fn force_disconnect(&self) {
        let was_active = {
            let mut state = self.lock_state();
            let was_active = matches!(state.phase, Phase::Connecting | Phase::Connected);
            state.phase = Phase::Disconnected;
            state.token = None;
            state.base_url = None;
            state.last_success = None;
            was_active
        };

        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
        self.waiting.store(false, Ordering::SeqCst);

        if was_active {
            self.metrics.record_disconnection();
            self.emit(ClientEvent::Disconnected);
        }
    }
}

/// Polling transport client.
///
/// Owns a single outbound session; `connect` discards any previous session
/// state and starts fresh.
pub struct TransportClient {
    shared: Arc<ClientShared>,
}

impl TransportClient {
    /// Create a client and the receiving end of its event channel.
    ///
    /// Registers the built-in message types on `registry`.
    pub fn new(
        registry: Arc<CodecRegistry>,
        config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        register_builtin_messages(&registry)?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(ProtocolError::from)?;

        let (events, events_rx) = mpsc::unbounded_channel();

        Ok((
            Self {
                shared: Arc::new(ClientShared {
                    http,
                    registry,
                    config,
                    state: Mutex::new(ClientState {
                        phase: Phase::Disconnected,
                        base_url: None,
                        token: None,
                        last_success: None,
                        latency: Duration::ZERO,
                    }),
                    queue: Mutex::new(VecDeque::new()),
                    waiting: AtomicBool::new(false),
                    poll_task: Mutex::new(None),
                    events,
                    metrics: TransportMetrics::new(),
                }),
            },
            events_rx,
        ))
    }

    /// Perform the connect handshake against `url` (the server's base URL)
    /// and start polling on acceptance.
    ///
    /// A handshake already in flight makes this call a no-op. An existing
    /// session is disconnected first; its state is discarded, not reused.
    pub async fn connect(&self, url: &str) -> Result<()> {
        // Validate before touching any session state.
        Url::parse(url)?;
        let base = url.trim_end_matches('/').to_string();

        // Claim the Connecting phase atomically against re-entrant calls.
        let needs_disconnect = {
            let mut state = self.shared.lock_state();
            match state.phase {
                Phase::Connecting => {
                    debug!("Connect already in flight, ignoring");
                    return Ok(());
                }
                Phase::Connected | Phase::Disconnecting => true,
                Phase::Disconnected => {
                    state.phase = Phase::Connecting;
                    state.base_url = Some(base.clone());
                    false
                }
            }
        };

        if needs_disconnect {
            self.shutdown(true);
            let mut state = self.shared.lock_state();
            state.phase = Phase::Connecting;
            state.base_url = Some(base.clone());
        }

        let connect_url = self.shared.endpoint(&base, "connect");
        debug!(url = %connect_url, "Requesting connect");

        let response = match self.shared.http.post(&connect_url).send().await {
            Ok(response) => response,
            Err(e) => return Err(self.fail_handshake(ProtocolError::from(e))),
        };

        // A rejection travels in a 403 body; anything else non-success is a
        // transport-level failure.
        let status = response.status();
        if !status.is_success() && status != StatusCode::FORBIDDEN {
            return Err(self.fail_handshake(ProtocolError::Http(format!(
                "server returned {status} for {connect_url}"
            ))));
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return Err(self.fail_handshake(ProtocolError::from(e))),
        };

        let mut reader = ObjectReader::new(&self.shared.registry, body);
        let message: ConnectionMessage = match reader.take_message() {
            Ok(message) => message,
            Err(e) => return Err(self.fail_handshake(e)),
        };

        match message {
            ConnectionMessage::Rejected { reason } => {
                self.shared.lock_state().phase = Phase::Disconnected;
                error!(%reason, "Server rejected connection");
                self.shared.emit(ClientEvent::Rejected(reason));
                Err(ProtocolError::Rejected(reason.to_string()))
            }
            ConnectionMessage::Accepted { token, poll_delay } => {
                info!(
                    token = %token,
                    delay_ms = poll_delay.as_millis() as u64,
                    "Server accepted connection"
                );

                // Poll at half the recommended delay to keep sender and
                // receiver loosely synchronized.
                let interval = (poll_delay / 2).max(self.shared.config.min_poll_interval);
                {
                    let mut state = self.shared.lock_state();
                    state.phase = Phase::Connected;
                    state.token = Some(token.clone());
                    state.last_success = Some(Instant::now());
                }
                self.shared.metrics.record_connection();

                let poll_shared = self.shared.clone();
                let task = tokio::spawn(async move {
                    poll_loop(poll_shared, interval).await;
                });
                if let Ok(mut poll_task) = self.shared.poll_task.lock() {
                    if let Some(previous) = poll_task.replace(task) {
                        previous.abort();
                    }
                }

                self.shared.emit(ClientEvent::Connected { token, poll_delay });
                Ok(())
            }
        }
    }

    /// Record a failed handshake: reset the phase, emit the event, and hand
    /// the error back to the caller.
    fn fail_handshake(&self, error: ProtocolError) -> ProtocolError {
        self.shared.lock_state().phase = Phase::Disconnected;
        error!(error = %error, "Connect handshake failed");
        self.shared
            .emit(ClientEvent::ConnectionFailed(error.to_string()));
        error
    }

    /// Queue a message for the next poll cycle.
    pub fn send(&self, message: Box<dyn Message>) {
        debug!(message_type = message.message_type_name(), "Queued message");
        if let Ok(mut queue) = self.shared.queue.lock() {
            queue.push_back(message);
        }
    }

    /// Disconnect, notifying the server. Safe to call from any state and
    /// never blocks on an in-flight request.
    pub async fn disconnect(&self) {
        self.shutdown(true);
    }

    /// Disconnect without notifying the server.
    pub async fn stop(&self) {
        self.shutdown(false);
    }

    fn shutdown(&self, send_disconnect: bool) {
        let (token, base_url) = {
            let mut state = self.shared.lock_state();
            if state.phase == Phase::Disconnected {
                (None, None)
            } else {
                state.phase = Phase::Disconnecting;
                (state.token.clone(), state.base_url.clone())
            }
        };

        if let Ok(mut poll_task) = self.shared.poll_task.lock() {
            if let Some(task) = poll_task.take() {
                task.abort();
            }
        }

        if send_disconnect {
            if let (Some(token), Some(base)) = (&token, &base_url) {
                // Fire and forget; the session is gone locally either way.
                let url = format!("{}?token={token}", self.shared.endpoint(base, "disconnect"));
                let http = self.shared.http.clone();
                tokio::spawn(async move {
                    if let Err(e) = http.post(url).send().await {
                        debug!(error = %e, "Disconnect notification failed");
                    }
                });
            }
        }

        self.shared.force_disconnect();
    }

    /// Whether a session is currently established.
    pub fn is_connected(&self) -> bool {
        self.shared.lock_state().phase == Phase::Connected
    }

    /// The current session token, if connected.
    pub fn token(&self) -> Option<String> {
        self.shared.lock_state().token.clone()
    }

    /// Round-trip time of the most recent poll exchange.
    pub fn latency(&self) -> Duration {
        self.shared.lock_state().latency
    }

    /// Number of messages waiting for the next poll cycle.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Point-in-time copy of the client's counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

async fn poll_loop(shared: Arc<ClientShared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        poll_tick(&shared).await;
    }
}

async fn poll_tick(shared: &Arc<ClientShared>) {
    // Natural backpressure: skip the tick while a request is in flight.
    if shared.waiting.swap(true, Ordering::SeqCst) {
        debug!("Previous poll still in flight, skipping tick");
        return;
    }

    shared.metrics.record_poll_tick();
    let result = poll_once(shared).await;
    shared.waiting.store(false, Ordering::SeqCst);

    let Err(error) = result else {
        return;
    };
    shared.metrics.record_poll_failure();

    if matches!(error, ProtocolError::UnknownToken) {
        // The server no longer knows us; a fresh connect is required.
        warn!("Server rejected session token, disconnecting");
        shared.emit(ClientEvent::Error(error));
        shared.force_disconnect();
        return;
    }

    if matches!(
        error,
        ProtocolError::Decode(_) | ProtocolError::Underflow { .. }
    ) {
        // Framing problems are fatal to the one reply, not the session.
        warn!(error = %error, "Failed to decode poll reply");
        shared.emit(ClientEvent::Error(error));
        return;
    }

    warn!(error = %error, "Poll tick failed");

    let since_success = shared
        .lock_state()
        .last_success
        .map(|at| at.elapsed())
        .unwrap_or(Duration::MAX);
    if since_success >= shared.config.disconnect_delay {
        error!(
            failed_for_ms = since_success.as_millis() as u64,
            "Repeated poll failures, forcing disconnect"
        );
        shared.emit(ClientEvent::Error(error));
        shared.force_disconnect();
    }
}

async fn poll_once(shared: &Arc<ClientShared>) -> Result<()> {
    let (token, base_url) = {
        let state = shared.lock_state();
        if state.phase != Phase::Connected {
            return Ok(());
        }
        match (state.token.clone(), state.base_url.clone()) {
            (Some(token), Some(base)) => (token, base),
            _ => return Err(ProtocolError::NotConnected),
        }
    };

    let batch: Vec<Box<dyn Message>> = match shared.queue.lock() {
        Ok(mut queue) => queue.drain(..).collect(),
        Err(_) => Vec::new(),
    };
    let outbound = DataMessage::new(batch);

    let mut writer = ObjectWriter::new(&shared.registry);
    writer.put_message(&outbound)?;
    let body = writer.finish();
    shared
        .metrics
        .record_sent(outbound.messages.len() as u64, body.len() as u64);

    let url = format!("{}?token={token}", shared.endpoint(&base_url, "data"));
    let started = Instant::now();

    let response = shared.http.post(url).body(body).send().await?;
    let status = response.status();
    if status == StatusCode::FORBIDDEN {
        return Err(ProtocolError::UnknownToken);
    }
    if !status.is_success() {
        return Err(ProtocolError::Http(format!("server returned {status}")));
    }

    {
        let mut state = shared.lock_state();
        state.last_success = Some(Instant::now());
        state.latency = started.elapsed();
    }

    let reply_body = response.bytes().await?;
    if reply_body.is_empty() {
        return Ok(());
    }

    let reply_bytes = reply_body.len() as u64;
    let mut reader = ObjectReader::new(&shared.registry, reply_body);
    let reply: DataMessage = reader.take_message()?;

    debug!(count = reply.messages.len(), "Received batch");
    shared
        .metrics
        .record_received(reply.messages.len() as u64, reply_bytes);
    for message in reply.messages {
        shared.emit(ClientEvent::Message(message));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> (TransportClient, mpsc::UnboundedReceiver<ClientEvent>) {
        let registry = Arc::new(CodecRegistry::new());
        TransportClient::new(registry, ClientConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_when_never_connected() {
        let (client, mut events) = client();
        client.disconnect().await;
        client.disconnect().await;
        assert!(!client.is_connected());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn connect_rejects_invalid_urls() {
        let (client, _events) = client();
        let err = client.connect("not a url").await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidUrl(_)));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn send_queues_until_next_tick() {
        let (client, _events) = client();
        client.send(Box::new(String::from("queued")));
        client.send(Box::new(String::from("more")));
        assert_eq!(client.queued(), 2);

        // Stopping discards the queue along with the session.
        client.stop().await;
        assert_eq!(client.queued(), 0);
    }

    #[tokio::test]
    async fn failed_handshake_emits_connection_failed() {
        let (client, mut events) = client();
        // Nothing is listening on this port.
        let result = client.connect("http://127.0.0.1:9").await;
        assert!(result.is_err());
        assert!(!client.is_connected());
        assert!(matches!(
            events.try_recv(),
            Ok(ClientEvent::ConnectionFailed(_))
        ));
    }
}

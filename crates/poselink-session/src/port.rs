//! The Session Port: connect/close lifecycle, topic dispatch, and
//! request/response correlation over an abstract message channel.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use poselink_core::topics::{self, ReplyKind};
use poselink_core::types::SessionConfig;

use crate::channel::MessageChannel;
use crate::envelope::Envelope;
use crate::error::{ErrorPayload, SessionError};

// ─── Connection State ─────────────────────────────────────────────

/// Lifecycle of a session endpoint. `Closed` is terminal; there is no
/// reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// `open()` was called; waiting for the peer's `session.open`.
    Opening,
    /// Both handshakes observed.
    Connected,
    /// Closed by either side, by channel failure, or by teardown.
    Closed,
}

// ─── Events ───────────────────────────────────────────────────────

/// Notifications raised by the port, drained by the owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Handshake completed. Raised exactly once.
    Connected,
    /// Session closed. Raised exactly once.
    Closed,
    /// A local protocol error was observed (malformed envelope, handler
    /// miss, handler failure, peer-reported error).
    Error { message: String },
}

// ─── Handlers ─────────────────────────────────────────────────────

pub type NotifyHandler = Box<dyn FnMut(&Value)>;
pub type RespondHandler = Box<dyn FnMut(&Value) -> Result<Value, String>>;
/// Catch-all for notifications on topics with no registered handler; sees
/// the topic name alongside the payload so the owner can route opaquely.
pub type UnhandledHandler = Box<dyn FnMut(&str, &Value)>;

/// Tagged handler variants: a topic either consumes notifications or yields
/// a result for request/response traffic.
pub enum TopicHandler {
    Notify(NotifyHandler),
    Respond(RespondHandler),
}

// ─── Pending Replies ──────────────────────────────────────────────

struct PendingSlot {
    topic: String,
    tx: oneshot::Sender<Result<Value, SessionError>>,
}

/// Outstanding result of a `request()` call.
///
/// Completed by the matching `resolve`/`reject` reply envelope, or rejected
/// when the session closes. Never silently dropped.
pub struct PendingReply {
    rx: oneshot::Receiver<Result<Value, SessionError>>,
}

impl PendingReply {
    fn rejected(err: SessionError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self { rx }
    }

    /// Non-blocking poll; `None` while the reply is still outstanding.
    pub fn try_take(&mut self) -> Option<Result<Value, SessionError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(SessionError::Closed)),
        }
    }

    /// Await the reply. Used by async callers; loopback tests poll instead.
    pub async fn wait(self) -> Result<Value, SessionError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Closed),
        }
    }
}

// ─── Session Port ─────────────────────────────────────────────────

/// One endpoint of a two-party, topic-addressed session.
///
/// Single-threaded: incoming traffic is processed by explicit `pump()`
/// calls from the owner's tick loop.
pub struct SessionPort {
    channel: Option<Box<dyn MessageChannel>>,
    state: ConnectionState,
    local_config: Option<SessionConfig>,
    peer_config: Option<SessionConfig>,
    handlers: HashMap<String, TopicHandler>,
    fallback: Option<UnhandledHandler>,
    pending: HashMap<u64, PendingSlot>,
    next_id: u64,
    events: VecDeque<SessionEvent>,
    connect_taken: bool,
    connected_at: Option<DateTime<Utc>>,
    last_activity: Instant,
}

impl Default for SessionPort {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionPort {
    pub fn new() -> Self {
        Self {
            channel: None,
            state: ConnectionState::Opening,
            local_config: None,
            peer_config: None,
            handlers: HashMap::new(),
            fallback: None,
            pending: HashMap::new(),
            next_id: 1,
            events: VecDeque::new(),
            connect_taken: false,
            connected_at: None,
            last_activity: Instant::now(),
        }
    }

    /// One-time: attach the channel and announce this side's capabilities.
    ///
    /// Fails if the port was already opened or already closed.
    pub fn open(
        &mut self,
        channel: Box<dyn MessageChannel>,
        config: SessionConfig,
    ) -> Result<(), SessionError> {
        if self.state == ConnectionState::Closed {
            return Err(SessionError::Closed);
        }
        if self.channel.is_some() {
            return Err(SessionError::AlreadyOpened);
        }

        self.channel = Some(channel);
        let payload = serde_json::to_value(&config)
            .map_err(|e| SessionError::MalformedEnvelope(e.to_string()))?;
        self.local_config = Some(config);

        let id = self.allocate_id();
        self.post_envelope(Envelope::new(id, topics::SESSION_OPEN, payload));
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn local_config(&self) -> Option<&SessionConfig> {
        self.local_config.as_ref()
    }

    /// The peer's negotiated configuration, once connected.
    pub fn peer_config(&self) -> Option<&SessionConfig> {
        self.peer_config.as_ref()
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    /// Time since the last envelope crossed this port in either direction.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// One-shot: the peer's configuration, deliverable exactly once after
    /// the handshake completes. A second retrieval is an error — there is
    /// no reconnect that would re-arm it.
    pub fn take_connect_notification(&mut self) -> Result<SessionConfig, SessionError> {
        let Some(config) = self.peer_config.clone() else {
            return Err(SessionError::NotConnected);
        };
        if self.connect_taken {
            return Err(SessionError::ConnectAlreadyDelivered);
        }
        self.connect_taken = true;
        Ok(config)
    }

    /// Register (or replace) the handler for a topic.
    pub fn set_handler(&mut self, topic: impl Into<String>, handler: TopicHandler) {
        self.handlers.insert(topic.into(), handler);
    }

    pub fn on_notify(&mut self, topic: impl Into<String>, f: impl FnMut(&Value) + 'static) {
        self.set_handler(topic, TopicHandler::Notify(Box::new(f)));
    }

    pub fn on_request(
        &mut self,
        topic: impl Into<String>,
        f: impl FnMut(&Value) -> Result<Value, String> + 'static,
    ) {
        self.set_handler(topic, TopicHandler::Respond(Box::new(f)));
    }

    /// Catch-all for notifications on topics with no registered handler.
    /// Envelopes expecting a response still take the handler-miss rejection
    /// path; only one-way traffic is routable opaquely.
    pub fn on_unhandled(&mut self, f: impl FnMut(&str, &Value) + 'static) {
        self.fallback = Some(Box::new(f));
    }

    /// Fire-and-forget send. Returns `false` on a closed session so shutdown
    /// races in caller code degrade gracefully instead of crashing.
    pub fn send(&mut self, topic: &str, payload: Value) -> bool {
        if self.state == ConnectionState::Closed || self.channel.is_none() {
            return false;
        }
        let id = self.allocate_id();
        self.post_envelope(Envelope::new(id, topic, payload))
    }

    /// Send tagged as expecting a response; the far handler's result (or
    /// failure) completes the returned reply.
    pub fn request(&mut self, topic: &str, payload: Value) -> PendingReply {
        if self.state == ConnectionState::Closed || self.channel.is_none() {
            return PendingReply::rejected(SessionError::Closed);
        }

        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingSlot {
                topic: topic.to_owned(),
                tx,
            },
        );
        // A post failure closes the port, which rejects the slot just added.
        self.post_envelope(Envelope::new(id, topic, payload).expecting_response());
        PendingReply { rx }
    }

    /// Idempotent close: notifies the peer if the channel is still up,
    /// rejects every pending request, and raises `Closed` exactly once.
    pub fn close(&mut self) {
        self.close_inner(true);
    }

    /// Drain pending inbound envelopes. Returns how many were processed.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        loop {
            if self.state == ConnectionState::Closed {
                break;
            }
            let taken = match self.channel.as_mut() {
                Some(channel) => channel.try_take(),
                None => break,
            };
            match taken {
                Ok(Some(data)) => {
                    self.last_activity = Instant::now();
                    processed += 1;
                    self.handle_raw(&data);
                }
                Ok(None) => break,
                Err(_) => {
                    // Peer endpoint is gone; treat as a remote close.
                    self.close_inner(false);
                    break;
                }
            }
        }
        processed
    }

    /// Drain queued session events.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    // ── internals ────────────────────────────────────────────────

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn post_envelope(&mut self, envelope: Envelope) -> bool {
        let Some(channel) = self.channel.as_mut() else {
            return false;
        };
        match channel.post(envelope.encode()) {
            Ok(()) => {
                self.last_activity = Instant::now();
                true
            }
            Err(_) => {
                self.close_inner(false);
                false
            }
        }
    }

    fn close_inner(&mut self, notify_peer: bool) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if notify_peer {
            let id = self.allocate_id();
            self.post_raw_best_effort(Envelope::new(id, topics::SESSION_CLOSE, Value::Null));
        }
        self.state = ConnectionState::Closed;
        self.channel = None;

        // Cancellation is rejection, never a silent drop.
        for (_, slot) in self.pending.drain() {
            let _ = slot.tx.send(Err(SessionError::Closed));
        }
        self.events.push_back(SessionEvent::Closed);
    }

    fn post_raw_best_effort(&mut self, envelope: Envelope) {
        if let Some(channel) = self.channel.as_mut() {
            let _ = channel.post(envelope.encode());
        }
    }

    fn handle_raw(&mut self, data: &str) {
        match Envelope::decode(data) {
            Ok(envelope) => self.dispatch(envelope),
            Err(e) => self.report_error(e.to_string()),
        }
    }

    fn dispatch(&mut self, envelope: Envelope) {
        // Synthetic reply topics complete pending requests.
        if let Some((base, kind, request_id)) = topics::parse_reply_topic(&envelope.topic) {
            self.complete_pending(base, kind, request_id, envelope.payload);
            return;
        }

        match envelope.topic.as_str() {
            topics::SESSION_OPEN => self.handle_open(envelope.payload),
            topics::SESSION_CLOSE => self.close_inner(false),
            topics::SESSION_ERROR => self.handle_peer_error(envelope.payload),
            _ => self.dispatch_to_handler(envelope),
        }
    }

    fn handle_open(&mut self, payload: Value) {
        if self.peer_config.is_some() {
            self.report_error("duplicate session.open from peer".to_owned());
            return;
        }
        match serde_json::from_value::<SessionConfig>(payload) {
            Ok(config) => {
                tracing::debug!(role = %config.role, "session handshake complete");
                self.peer_config = Some(config);
                self.connected_at = Some(Utc::now());
                if self.state == ConnectionState::Opening {
                    self.state = ConnectionState::Connected;
                    self.events.push_back(SessionEvent::Connected);
                }
            }
            Err(e) => self.report_error(format!("invalid session.open payload: {e}")),
        }
    }

    fn handle_peer_error(&mut self, payload: Value) {
        let message = serde_json::from_value::<ErrorPayload>(payload)
            .map(|p| p.message)
            .unwrap_or_else(|_| "peer reported an unreadable error".to_owned());
        self.report_error(format!("peer error: {message}"));
    }

    fn complete_pending(&mut self, base: &str, kind: ReplyKind, request_id: u64, payload: Value) {
        let Some(slot) = self.pending.remove(&request_id) else {
            self.report_error(format!("reply for unknown request {request_id} on {base}"));
            return;
        };
        if slot.topic != base {
            tracing::warn!(
                expected = %slot.topic,
                got = %base,
                "reply topic does not match request topic"
            );
        }
        let result = match kind {
            ReplyKind::Resolve => Ok(payload),
            ReplyKind::Reject => {
                let message = serde_json::from_value::<ErrorPayload>(payload)
                    .map(|p| p.message)
                    .unwrap_or_else(|_| "unreadable rejection".to_owned());
                Err(SessionError::Rejected(message))
            }
        };
        let _ = slot.tx.send(result);
    }

    fn dispatch_to_handler(&mut self, envelope: Envelope) {
        // Temporarily remove the handler so it can run while the port sends
        // replies through &mut self.
        let Some(mut handler) = self.handlers.remove(&envelope.topic) else {
            if !envelope.expects_response {
                if let Some(mut fallback) = self.fallback.take() {
                    fallback(&envelope.topic, &envelope.payload);
                    self.fallback = Some(fallback);
                    return;
                }
            }
            self.report_error(format!("no handler registered for topic {}", envelope.topic));
            if envelope.expects_response {
                self.send_reject(
                    &envelope.topic,
                    envelope.id,
                    format!("no handler registered for topic {}", envelope.topic),
                );
            }
            return;
        };

        match &mut handler {
            TopicHandler::Notify(f) => {
                f(&envelope.payload);
                if envelope.expects_response {
                    // Notify handlers yield no value.
                    self.send_resolve(&envelope.topic, envelope.id, Value::Null);
                }
            }
            TopicHandler::Respond(f) => match f(&envelope.payload) {
                Ok(value) => {
                    if envelope.expects_response {
                        self.send_resolve(&envelope.topic, envelope.id, value);
                    }
                }
                Err(message) => {
                    if envelope.expects_response {
                        self.send_reject(&envelope.topic, envelope.id, message);
                    } else {
                        self.report_error(format!(
                            "handler for {} failed: {message}",
                            envelope.topic
                        ));
                    }
                }
            },
        }

        self.handlers.insert(envelope.topic, handler);
    }

    fn send_resolve(&mut self, base: &str, request_id: u64, value: Value) {
        let id = self.allocate_id();
        let topic = topics::resolve_topic(base, request_id);
        self.post_envelope(Envelope::new(id, topic, value));
    }

    fn send_reject(&mut self, base: &str, request_id: u64, message: String) {
        let id = self.allocate_id();
        let topic = topics::reject_topic(base, request_id);
        let payload = match serde_json::to_value(ErrorPayload::new(message)) {
            Ok(value) => value,
            Err(_) => Value::Null,
        };
        self.post_envelope(Envelope::new(id, topic, payload));
    }

    fn report_error(&mut self, message: String) {
        tracing::warn!(%message, "session error");
        self.events.push_back(SessionEvent::Error { message });
    }
}

// ─── Tests ────────────────────────────────────────────────────────

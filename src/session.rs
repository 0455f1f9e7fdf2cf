//! The Bayeux session task.
//!
//! A single background task owns every piece of mutable session state: the
//! lifecycle state machine, the subscription registry, the per-meta-channel
//! handler chains, the keep-alive deadline, and the reconnect controller.
//! It multiplexes, via `tokio::select!`, between:
//!
//! - commands from the public [`BayeuxClient`](crate::BayeuxClient) handle
//! - events from the transport task
//! - the keep-alive and reconnect timer deadlines
//!
//! Because everything runs on this one task, no state here needs locking.

use crate::{
    error::{BayeuxLinkError, Result},
    event_handlers::EventHandlers,
    http,
    message::{
        is_valid_channel, Message, MetaChannel, ReconnectAdvice, Subscription,
        CONNECTION_TYPE_WEBSOCKET, META_CHANNEL_PREFIX,
    },
    options::{ConnectionOptions, DEFAULT_RETRY_INTERVAL_MS},
    protocol::{self, MessageIdGenerator},
    reachability::ReachabilityProbe,
    transport::{FailureClass, TransportCmd, TransportEvent},
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant as TokioInstant};

/// Maximum accepted inbound text frame size (64 MiB).
const MAX_INBOUND_TEXT_BYTES: usize = 64 << 20;

/// A duration far enough in the future (~100 years) to act as "never" for
/// deadline calculations without overflowing `Instant::now() + dur`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Callback invoked with `(channel, data)` for each message delivered to a
/// subscription.
pub type MessageCallback = Arc<dyn Fn(&str, &JsonValue) + Send + Sync>;

/// Callback invoked once the session is connected, registered via
/// [`BayeuxClient::connect_with`](crate::BayeuxClient::connect_with).
pub type ConnectCallback = Arc<dyn Fn() + Send + Sync>;

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from the public API (and internal helper tasks) to the
/// session task.
pub(crate) enum Cmd {
    /// Begin connecting: handshake, then keep-alive connects.
    Connect {
        extension: Option<JsonValue>,
        on_success: Option<ConnectCallback>,
    },
    /// Gracefully end the session.
    Disconnect,
    /// Re-establish the session and restore subscriptions.
    Reconnect,
    /// Register channels and send `/meta/subscribe`.
    Subscribe {
        channels: Vec<String>,
        callback: MessageCallback,
        extension: Option<JsonValue>,
    },
    /// Remove channels locally and send `/meta/unsubscribe`.
    Unsubscribe { channels: Vec<String> },
    /// Send `/meta/unsubscribe` for every registered entry.
    UnsubscribeAll,
    /// Publish a payload to an application channel.
    Publish {
        channel: String,
        data: JsonValue,
        extension: Option<JsonValue>,
    },
    /// Snapshot the registry's channel set.
    SubscribedChannels { reply: oneshot::Sender<Vec<String>> },
    /// Outcome of an async HTTP handshake POST.
    HttpHandshakeResult(Result<Vec<Message>>),
    /// A watched host became reachable.
    HostReachable,
    /// Tear the session down.
    Shutdown,
}

// ── Shared status flags ─────────────────────────────────────────────────────

/// Lock-free state flags shared with the public handle.
#[derive(Debug, Default)]
pub(crate) struct SharedStatus {
    pub connected: AtomicBool,
    pub connecting: AtomicBool,
    pub reconnecting: AtomicBool,
}

// ── Session state machine ───────────────────────────────────────────────────

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Disconnected,
    Handshaking,
    Connecting,
    Connected,
    Disconnecting,
}

impl SessionState {
    /// Whether the session is in one of the two pre-connected states.
    fn is_connecting(self) -> bool {
        matches!(self, SessionState::Handshaking | SessionState::Connecting)
    }
}

// ── Subscriptions ───────────────────────────────────────────────────────────

/// A registered subscription. One entry may back several channels when they
/// were subscribed together; the registry drops the entry with its last
/// channel.
pub(crate) struct SubscriptionEntry {
    pub callback: MessageCallback,
    pub extension: Option<JsonValue>,
}

// ── Meta-channel handler chains ─────────────────────────────────────────────

/// A one-shot interceptor for the next reply on a meta channel. It runs at
/// most once; popping it restores the previous head (another one-shot, or
/// the built-in handler).
type OneShotHandler = Box<dyn FnOnce(&mut Session, &Message) + Send>;

/// Per-meta-channel stacks of one-shot handlers. An empty stack means the
/// built-in handler is the head.
struct MetaChains {
    slots: [Vec<OneShotHandler>; 5],
}

impl Default for MetaChains {
    fn default() -> Self {
        Self {
            slots: [Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new()],
        }
    }
}

impl MetaChains {
    fn push(&mut self, meta: MetaChannel, handler: OneShotHandler) {
        self.slots[Self::index(meta)].push(handler);
    }

    fn pop(&mut self, meta: MetaChannel) -> Option<OneShotHandler> {
        self.slots[Self::index(meta)].pop()
    }

    fn index(meta: MetaChannel) -> usize {
        match meta {
            MetaChannel::Handshake => 0,
            MetaChannel::Connect => 1,
            MetaChannel::Disconnect => 2,
            MetaChannel::Subscribe => 3,
            MetaChannel::Unsubscribe => 4,
        }
    }
}

/// What to do once the session reaches `Connected`.
enum SuccessAction {
    /// Run the user's connect-success callback.
    User(ConnectCallback),
    /// Re-issue `/meta/subscribe` for the subscriptions preserved across a
    /// reconnect, then clear the reconnecting flag.
    Resubscribe,
}

/// Outcome of applying a message's advice, consumed by the meta handlers of
/// the same message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdviceAction {
    Retry,
    Rehandshake,
    Terminated,
}

// ── The session ─────────────────────────────────────────────────────────────

pub(crate) struct Session {
    options: ConnectionOptions,
    handlers: EventHandlers,
    http: reqwest::Client,
    http_url: String,
    ws_host: String,
    ws_port: u16,
    reachability: Arc<dyn ReachabilityProbe>,
    status: Arc<SharedStatus>,
    transport_tx: mpsc::Sender<TransportCmd>,
    /// Sender into this task's own command channel, for helper tasks.
    self_tx: mpsc::Sender<Cmd>,

    state: SessionState,
    socket_open: bool,
    /// A handshake should go out over the socket as soon as it opens.
    pending_ws_handshake: bool,
    client_id: Option<String>,
    connection_type: Option<String>,
    connection_extension: Option<JsonValue>,
    /// Keep-alive period; server advice may override the configured value.
    retry_interval: Duration,
    reconnecting: bool,
    disconnect_requested: bool,
    watching_reachability: bool,
    channels: HashMap<String, Arc<SubscriptionEntry>>,
    /// Subscription groups captured when a reconnect begins.
    preserved: Vec<(Vec<String>, Arc<SubscriptionEntry>)>,
    /// Success actions parked while waiting for the socket to open.
    pending_success: Vec<SuccessAction>,
    chains: MetaChains,
    ids: MessageIdGenerator,
    last_advice_action: Option<AdviceAction>,
    keepalive_deadline: Option<TokioInstant>,
    reconnect_deadline: Option<TokioInstant>,
    /// Classification of the most recent transport failure, consumed when
    /// the matching close event arrives.
    pending_failure: Option<FailureClass>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        options: ConnectionOptions,
        handlers: EventHandlers,
        http: reqwest::Client,
        http_url: String,
        ws_host: String,
        ws_port: u16,
        reachability: Arc<dyn ReachabilityProbe>,
        status: Arc<SharedStatus>,
        transport_tx: mpsc::Sender<TransportCmd>,
        self_tx: mpsc::Sender<Cmd>,
    ) -> Self {
        let retry_interval = options.retry_interval();
        Self {
            options,
            handlers,
            http,
            http_url,
            ws_host,
            ws_port,
            reachability,
            status,
            transport_tx,
            self_tx,
            state: SessionState::Disconnected,
            socket_open: false,
            pending_ws_handshake: false,
            client_id: None,
            connection_type: None,
            connection_extension: None,
            retry_interval,
            reconnecting: false,
            disconnect_requested: false,
            watching_reachability: false,
            channels: HashMap::new(),
            preserved: Vec::new(),
            pending_success: Vec::new(),
            chains: MetaChains::default(),
            ids: MessageIdGenerator::new(),
            last_advice_action: None,
            keepalive_deadline: None,
            reconnect_deadline: None,
            pending_failure: None,
        }
    }

    // ── Commands ────────────────────────────────────────────────────────

    fn handle_cmd(&mut self, cmd: Cmd) {
        match cmd {
            Cmd::Connect {
                extension,
                on_success,
            } => self.start_connect(extension, on_success.map(SuccessAction::User)),
            Cmd::Disconnect => self.request_disconnect(),
            Cmd::Reconnect => self.do_reconnect(),
            Cmd::Subscribe {
                channels,
                callback,
                extension,
            } => self.do_subscribe(channels, callback, extension),
            Cmd::Unsubscribe { channels } => self.do_unsubscribe(channels),
            Cmd::UnsubscribeAll => self.do_unsubscribe_all(),
            Cmd::Publish {
                channel,
                data,
                extension,
            } => self.do_publish(channel, data, extension),
            Cmd::SubscribedChannels { reply } => {
                let mut channels: Vec<String> = self.channels.keys().cloned().collect();
                channels.sort();
                let _ = reply.send(channels);
            },
            Cmd::HttpHandshakeResult(result) => self.handle_http_handshake_result(result),
            Cmd::HostReachable => self.handle_host_reachable(),
            Cmd::Shutdown => {}, // handled by the task loop
        }
    }

    // ── Connect / disconnect / reconnect ────────────────────────────────

    /// The meta channel whose reply signals connect success, per the
    /// `await_only_handshake` policy.
    fn success_meta(&self) -> MetaChannel {
        if self.options.await_only_handshake {
            MetaChannel::Handshake
        } else {
            MetaChannel::Connect
        }
    }

    fn start_connect(&mut self, extension: Option<JsonValue>, action: Option<SuccessAction>) {
        if self.state != SessionState::Disconnected {
            log::debug!("[bayeux-link] connect ignored in state {:?}", self.state);
            return;
        }
        log::info!("[bayeux-link] Connecting to {}", self.ws_host);
        self.disconnect_requested = false;
        self.connection_extension = extension;
        self.set_state(SessionState::Handshaking);

        if let Some(action) = action {
            let meta = self.success_meta();
            self.install_success_one_shot(meta, action);
        }

        if self.socket_open {
            self.send_envelope(protocol::handshake());
        } else {
            let _ = self.transport_tx.try_send(TransportCmd::Open);
            if self.options.may_send_handshake_async {
                self.spawn_http_handshake();
            } else {
                self.pending_ws_handshake = true;
            }
        }
    }

    /// Chain a one-shot on the success meta channel that runs `action` once
    /// the session is truly connected, re-arming itself across transient
    /// failures until then (or until an explicit disconnect).
    fn install_success_one_shot(&mut self, meta: MetaChannel, action: SuccessAction) {
        self.chains.push(
            meta,
            Box::new(move |session, msg| {
                session.handle_meta(meta, msg);
                match session.state {
                    SessionState::Connected => session.run_success_action(action),
                    // Handshake processed but the socket is still opening;
                    // the Connected transition will run the action.
                    SessionState::Connecting => session.pending_success.push(action),
                    _ => {
                        if !session.disconnect_requested {
                            session.install_success_one_shot(meta, action);
                        }
                    },
                }
            }),
        );
    }

    fn run_success_action(&mut self, action: SuccessAction) {
        match action {
            SuccessAction::User(callback) => callback(),
            SuccessAction::Resubscribe => self.finish_reconnect(),
        }
    }

    fn request_disconnect(&mut self) {
        if matches!(self.state, SessionState::Disconnected | SessionState::Disconnecting) {
            return;
        }
        self.disconnect_requested = true;
        self.reconnecting = false;
        self.status.reconnecting.store(false, Ordering::SeqCst);
        self.reconnect_deadline = None;

        if let Some(client_id) = self.client_id.clone() {
            log::info!("[bayeux-link] Disconnecting");
            self.set_state(SessionState::Disconnecting);
            self.send_envelope(protocol::disconnect(&client_id));
        } else {
            // No identity yet: intercept the next handshake reply and
            // disconnect once the clientId is known.
            log::debug!("[bayeux-link] Disconnect deferred until handshake completes");
            self.chains.push(
                MetaChannel::Handshake,
                Box::new(|session, msg| {
                    session.handle_handshake_reply(msg);
                    session.request_disconnect();
                }),
            );
        }
    }

    fn do_reconnect(&mut self) {
        if self.state != SessionState::Disconnected || self.disconnect_requested {
            log::debug!("[bayeux-link] reconnect ignored in state {:?}", self.state);
            return;
        }
        let first_attempt = !self.reconnecting;
        if first_attempt {
            log::info!(
                "[bayeux-link] Reconnecting; preserving {} subscribed channel(s)",
                self.channels.len()
            );
            self.reconnecting = true;
            self.status.reconnecting.store(true, Ordering::SeqCst);
            self.preserved = self.entry_groups();
        }
        self.start_connect(
            self.connection_extension.clone(),
            first_attempt.then_some(SuccessAction::Resubscribe),
        );
    }

    /// Re-issue `/meta/subscribe` for every preserved entry directly,
    /// bypassing the registry bookkeeping, then clear the reconnecting flag.
    fn finish_reconnect(&mut self) {
        let preserved = std::mem::take(&mut self.preserved);
        if !preserved.is_empty() {
            log::info!(
                "[bayeux-link] Re-subscribing {} subscription group(s) after reconnect",
                preserved.len()
            );
        }
        if let Some(client_id) = self.client_id.clone() {
            for (channels, entry) in preserved {
                self.send_envelope(protocol::subscribe(
                    &client_id,
                    Subscription::from_channels(&channels),
                    entry.extension.clone(),
                ));
            }
        }
        self.reconnecting = false;
        self.status.reconnecting.store(false, Ordering::SeqCst);
    }

    /// Tear the session down to `Disconnected` and close the socket.
    fn terminate(&mut self) {
        self.keepalive_deadline = None;
        self.client_id = None;
        self.connection_type = None;
        self.set_state(SessionState::Disconnected);
        if self.socket_open {
            let _ = self.transport_tx.try_send(TransportCmd::Close);
        }
    }

    /// Discard the session identity and renegotiate over the open socket.
    fn rehandshake(&mut self) {
        log::info!("[bayeux-link] Re-handshaking");
        self.client_id = None;
        self.connection_type = None;
        self.keepalive_deadline = None;
        self.set_state(SessionState::Handshaking);
        if self.socket_open {
            self.send_envelope(protocol::handshake());
        } else {
            self.pending_ws_handshake = true;
            let _ = self.transport_tx.try_send(TransportCmd::Open);
        }
    }

    fn spawn_http_handshake(&self) {
        let http = self.http.clone();
        let url = self.http_url.clone();
        let self_tx = self.self_tx.clone();
        let envelope = protocol::handshake();
        tokio::spawn(async move {
            let result = http::post_handshake(&http, &url, &envelope).await;
            let _ = self_tx.send(Cmd::HttpHandshakeResult(result)).await;
        });
    }

    fn handle_http_handshake_result(&mut self, result: Result<Vec<Message>>) {
        match result {
            Ok(batch) => {
                for msg in batch {
                    self.handle_message(msg);
                }
            },
            Err(e) => {
                log::warn!("[bayeux-link] HTTP handshake failed: {}", e);
                self.handlers.emit_failed(e);
                if self.state == SessionState::Handshaking {
                    // Fall back to handshaking over the socket.
                    if self.socket_open {
                        self.send_envelope(protocol::handshake());
                    } else {
                        self.pending_ws_handshake = true;
                    }
                }
            },
        }
    }

    // ── Subscribing / publishing ────────────────────────────────────────

    fn do_subscribe(
        &mut self,
        channels: Vec<String>,
        callback: MessageCallback,
        extension: Option<JsonValue>,
    ) {
        if let Some(bad) = channels.iter().find(|c| !is_valid_channel(c)) {
            self.handlers.emit_failed(BayeuxLinkError::ConfigurationError(format!(
                "channel must begin with '/': {:?}",
                bad
            )));
            return;
        }
        if channels.is_empty() {
            return;
        }

        let entry = Arc::new(SubscriptionEntry {
            callback,
            extension: extension.clone(),
        });
        for channel in &channels {
            self.channels.insert(channel.clone(), entry.clone());
        }

        if let Some(client_id) = self.client_id.clone() {
            self.send_envelope(protocol::subscribe(
                &client_id,
                Subscription::from_channels(&channels),
                extension,
            ));
        } else {
            self.handlers.emit_failed(BayeuxLinkError::SocketNotOpen(format!(
                "cannot subscribe to {:?} before the session is connected",
                channels
            )));
        }
    }

    fn do_unsubscribe(&mut self, channels: Vec<String>) {
        // Local removal is eager; the acknowledgement is informational.
        for channel in &channels {
            self.channels.remove(channel);
        }
        if let Some(client_id) = self.client_id.clone() {
            self.send_envelope(protocol::unsubscribe(
                &client_id,
                Subscription::from_channels(&channels),
            ));
        } else {
            log::debug!("[bayeux-link] Unsubscribe of {:?} while not connected", channels);
        }
    }

    fn do_unsubscribe_all(&mut self) {
        // Local entries are retained here; they are removed by the
        // unsubscribe acknowledgement handler.
        let Some(client_id) = self.client_id.clone() else {
            log::debug!("[bayeux-link] unsubscribe_all while not connected");
            return;
        };
        for (channels, _entry) in self.entry_groups() {
            self.send_envelope(protocol::unsubscribe(
                &client_id,
                Subscription::from_channels(&channels),
            ));
        }
    }

    fn do_publish(&mut self, channel: String, data: JsonValue, extension: Option<JsonValue>) {
        if !is_valid_channel(&channel) {
            self.handlers.emit_failed(BayeuxLinkError::ConfigurationError(format!(
                "channel must begin with '/': {:?}",
                channel
            )));
            return;
        }
        if let Some(client_id) = self.client_id.clone() {
            let id = self.ids.next();
            self.send_envelope(protocol::publish(&channel, &client_id, data, id, extension));
        } else {
            self.handlers.emit_failed(BayeuxLinkError::SocketNotOpen(format!(
                "cannot publish to {} before the session is connected",
                channel
            )));
        }
    }

    /// Group registered channels by their shared entry, so aggregated
    /// subscriptions re-emit as one envelope.
    fn entry_groups(&self) -> Vec<(Vec<String>, Arc<SubscriptionEntry>)> {
        let mut groups: Vec<(Vec<String>, Arc<SubscriptionEntry>)> = Vec::new();
        for (channel, entry) in &self.channels {
            if let Some((channels, _)) = groups.iter_mut().find(|(_, e)| Arc::ptr_eq(e, entry)) {
                channels.push(channel.clone());
            } else {
                groups.push((vec![channel.clone()], entry.clone()));
            }
        }
        for (channels, _) in &mut groups {
            channels.sort();
        }
        groups.sort_by(|a, b| a.0.cmp(&b.0));
        groups
    }

    // ── Transport events ────────────────────────────────────────────────

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                self.socket_open = true;
                match self.state {
                    SessionState::Handshaking if self.pending_ws_handshake => {
                        self.pending_ws_handshake = false;
                        self.send_envelope(protocol::handshake());
                    },
                    SessionState::Connecting if self.client_id.is_some() => {
                        self.finish_connect();
                    },
                    _ => {},
                }
            },
            TransportEvent::Text(text) => {
                if text.len() > MAX_INBOUND_TEXT_BYTES {
                    log::warn!("[bayeux-link] Dropping oversized frame ({} bytes)", text.len());
                    return;
                }
                self.handlers.emit_receive(&text);
                match protocol::decode_batch(&text) {
                    Ok(batch) => {
                        for msg in batch {
                            self.handle_message(msg);
                        }
                    },
                    Err(e) => {
                        log::warn!("[bayeux-link] Failed to decode inbound payload: {}", e);
                        self.handlers.emit_failed(e);
                    },
                }
            },
            TransportEvent::Failed(failure) => {
                log::warn!("[bayeux-link] Transport failure: {}", failure.message);
                self.pending_failure = Some(failure.class);
                self.handlers
                    .emit_failed(BayeuxLinkError::WebSocketError(failure.message));
            },
            TransportEvent::Closed {
                code,
                reason,
                was_clean,
            } => self.handle_transport_closed(code, reason, was_clean),
        }
    }

    fn handle_transport_closed(&mut self, code: Option<u16>, reason: String, was_clean: bool) {
        self.socket_open = false;
        self.pending_ws_handshake = false;

        if self.state == SessionState::Disconnected {
            // Already disconnected (explicitly, or via advice); nothing to do.
            self.pending_failure = None;
            return;
        }

        let user_initiated = self.disconnect_requested || self.state == SessionState::Disconnecting;
        self.keepalive_deadline = None;
        self.client_id = None;
        self.connection_type = None;
        self.set_state(SessionState::Disconnected);

        let error = if was_clean && reason.is_empty() {
            None
        } else {
            Some(BayeuxLinkError::SocketClosed { code, reason })
        };
        self.handlers.emit_disconnected(None, error);

        // Success actions parked on the Connected transition go back onto
        // the chain so they survive the retry.
        let parked = std::mem::take(&mut self.pending_success);
        for action in parked {
            if !self.disconnect_requested {
                self.install_success_one_shot(self.success_meta(), action);
            }
        }

        if user_initiated {
            self.pending_failure = None;
        } else if let Some(class) = self.pending_failure.take() {
            self.handle_transport_failure(class);
        }
    }

    fn handle_transport_failure(&mut self, class: FailureClass) {
        match class {
            FailureClass::NetworkUnreachable => {
                if self.options.reconnect_interval().is_none() || self.watching_reachability {
                    return;
                }
                self.watching_reachability = true;
                let (notify_tx, notify_rx) = oneshot::channel();
                self.reachability
                    .watch(self.ws_host.clone(), self.ws_port, notify_tx);
                let self_tx = self.self_tx.clone();
                tokio::spawn(async move {
                    if notify_rx.await.is_ok() {
                        let _ = self_tx.send(Cmd::HostReachable).await;
                    }
                });
            },
            FailureClass::ConnectionLost => {
                if let Some(delay) = self.options.reconnect_interval() {
                    log::info!("[bayeux-link] Scheduling reconnect in {:?}", delay);
                    self.reconnect_deadline = Some(TokioInstant::now() + delay);
                }
            },
            FailureClass::Other => {},
        }
    }

    fn handle_host_reachable(&mut self) {
        self.watching_reachability = false;
        if !self.reconnecting && self.options.reconnect_interval().is_some() {
            self.do_reconnect();
        }
    }

    // ── Timers ──────────────────────────────────────────────────────────

    fn schedule_keepalive(&mut self) {
        self.keepalive_deadline = Some(TokioInstant::now() + self.retry_interval);
    }

    fn keepalive_tick(&mut self) {
        self.keepalive_deadline = None;
        // A stale timer may fire after a state change; self-check and drop.
        if self.state != SessionState::Connected {
            return;
        }
        if let (Some(client_id), Some(connection_type)) =
            (self.client_id.clone(), self.connection_type.clone())
        {
            self.send_envelope(protocol::connect(
                &client_id,
                &connection_type,
                self.connection_extension.clone(),
            ));
        }
    }

    fn reconnect_tick(&mut self) {
        self.reconnect_deadline = None;
        self.do_reconnect();
    }

    // ── Inbound dispatch ────────────────────────────────────────────────

    /// Route one inbound message: advice first, then the meta-channel
    /// handler chain, then subscription delivery.
    fn handle_message(&mut self, msg: Message) {
        self.last_advice_action = None;
        if msg.advice.is_some() {
            self.apply_advice(&msg);
        }

        if let Some(meta) = msg.meta_channel() {
            match self.chains.pop(meta) {
                Some(one_shot) => one_shot(self, &msg),
                None => self.handle_meta(meta, &msg),
            }
        } else if msg.channel.starts_with(META_CHANNEL_PREFIX) {
            self.handlers
                .emit_failed(BayeuxLinkError::UnhandledMetaChannelMessage(msg.channel.clone()));
        } else if let Some(entry) = self.channels.get(&msg.channel).cloned() {
            if let Some(data) = &msg.data {
                (entry.callback)(&msg.channel, data);
            }
        } else {
            log::debug!("[bayeux-link] Unexpected message on {}", msg.channel);
            self.handlers.emit_unexpected_message(msg);
        }
    }

    /// Apply a message's advice before its handler runs, so the handler
    /// sees updated state.
    fn apply_advice(&mut self, msg: &Message) {
        let Some(advice) = &msg.advice else { return };
        match advice.reconnect {
            Some(ReconnectAdvice::Retry) => {
                let advised = match advice.interval {
                    Some(ms) => Duration::from_millis(ms),
                    None => self.retry_interval,
                };
                let mut interval = self.handlers.advise_retry(advised);
                if interval.is_zero() {
                    interval = Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS);
                }
                if interval != self.retry_interval {
                    log::debug!("[bayeux-link] Retry interval is now {:?}", interval);
                }
                self.retry_interval = interval;
                self.last_advice_action = Some(AdviceAction::Retry);
            },
            Some(ReconnectAdvice::Handshake) => {
                if self.handlers.advise_handshake() {
                    self.rehandshake();
                    self.last_advice_action = Some(AdviceAction::Rehandshake);
                }
            },
            Some(ReconnectAdvice::None) => {
                if msg
                    .subscription
                    .as_ref()
                    .is_some_and(|s| s.contains("connection"))
                {
                    log::warn!("[bayeux-link] Server terminated the session");
                    self.handlers
                        .emit_failed(BayeuxLinkError::ReceivedAdviceReconnectTypeNone);
                    self.terminate();
                    self.last_advice_action = Some(AdviceAction::Terminated);
                }
            },
            None => {},
        }
    }

    fn handle_meta(&mut self, meta: MetaChannel, msg: &Message) {
        match meta {
            MetaChannel::Handshake => self.handle_handshake_reply(msg),
            MetaChannel::Connect => self.handle_connect_reply(msg),
            MetaChannel::Disconnect => self.handle_disconnect_reply(msg),
            MetaChannel::Subscribe => self.handle_subscribe_reply(msg),
            MetaChannel::Unsubscribe => self.handle_unsubscribe_reply(msg),
        }
    }

    fn handle_handshake_reply(&mut self, msg: &Message) {
        if msg.is_successful() {
            let offered = msg.supported_connection_types.clone().unwrap_or_default();
            if !offered.iter().any(|t| t == CONNECTION_TYPE_WEBSOCKET) {
                self.handlers
                    .emit_failed(BayeuxLinkError::NoCommonSupportedConnectionType(offered));
                self.terminate();
                return;
            }
            let Some(client_id) = msg.client_id.clone() else {
                self.handlers.emit_failed(BayeuxLinkError::HandshakeFailed(
                    "handshake reply is missing clientId".to_string(),
                ));
                self.terminate();
                return;
            };
            log::info!("[bayeux-link] Handshake succeeded; clientId={}", client_id);
            self.client_id = Some(client_id);
            self.connection_type = Some(CONNECTION_TYPE_WEBSOCKET.to_string());
            self.set_state(SessionState::Connecting);
            if self.socket_open {
                self.finish_connect();
            }
        } else {
            log::warn!("[bayeux-link] Handshake rejected: {}", msg.error_message());
            self.handlers
                .emit_failed(BayeuxLinkError::HandshakeFailed(msg.error_message()));
            match self.last_advice_action {
                // The advice handler already repositioned the session.
                Some(AdviceAction::Rehandshake) | Some(AdviceAction::Terminated) => {},
                _ => self.terminate(),
            }
        }
    }

    fn handle_connect_reply(&mut self, msg: &Message) {
        if msg.is_successful() {
            // The initial Connected transition happens at handshake time;
            // here a reply only sustains the keep-alive cycle.
            if self.state == SessionState::Connected {
                self.schedule_keepalive();
            }
        } else {
            match self.last_advice_action {
                Some(AdviceAction::Retry) => {
                    if self.state == SessionState::Connected {
                        self.schedule_keepalive();
                    }
                },
                Some(AdviceAction::Rehandshake) | Some(AdviceAction::Terminated) => {},
                _ => {
                    self.handlers
                        .emit_failed(BayeuxLinkError::ConnectFailed(msg.error_message()));
                    self.terminate();
                },
            }
        }
    }

    fn handle_disconnect_reply(&mut self, msg: &Message) {
        log::info!("[bayeux-link] Disconnect acknowledged");
        self.keepalive_deadline = None;
        self.client_id = None;
        self.connection_type = None;
        self.set_state(SessionState::Disconnected);
        if self.socket_open {
            let _ = self.transport_tx.try_send(TransportCmd::Close);
        }
        self.handlers.emit_disconnected(Some(msg.clone()), None);
    }

    fn handle_subscribe_reply(&mut self, msg: &Message) {
        let channels = msg
            .subscription
            .as_ref()
            .map(|s| s.channels())
            .unwrap_or_default();
        if msg.is_successful() {
            for channel in &channels {
                self.handlers.emit_subscription_succeeded(channel);
            }
        } else {
            self.handlers.emit_failed(BayeuxLinkError::SubscribeFailed {
                channels,
                message: msg.error_message(),
            });
        }
    }

    fn handle_unsubscribe_reply(&mut self, msg: &Message) {
        let channels = msg
            .subscription
            .as_ref()
            .map(|s| s.channels())
            .unwrap_or_default();
        if msg.is_successful() {
            for channel in &channels {
                self.channels.remove(channel);
            }
        } else {
            self.handlers.emit_failed(BayeuxLinkError::UnsubscribeFailed {
                channels,
                message: msg.error_message(),
            });
        }
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// Complete the transition to `Connected`: schedule (never send) the
    /// first keep-alive and run any parked success actions.
    fn finish_connect(&mut self) {
        self.set_state(SessionState::Connected);
        self.schedule_keepalive();
        self.handlers.emit_connected();
        for action in std::mem::take(&mut self.pending_success) {
            self.run_success_action(action);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::debug!("[bayeux-link] Session state {:?} -> {:?}", self.state, state);
        }
        self.state = state;
        self.status
            .connected
            .store(state == SessionState::Connected, Ordering::SeqCst);
        self.status
            .connecting
            .store(state.is_connecting(), Ordering::SeqCst);
    }

    fn send_envelope(&mut self, msg: Message) {
        if !self.socket_open {
            self.handlers.emit_failed(BayeuxLinkError::SocketNotOpen(format!(
                "cannot send {} while the socket is closed",
                msg.channel
            )));
            return;
        }
        match protocol::encode_frame(&msg) {
            Ok(text) => {
                self.handlers.emit_send(&text);
                if self.transport_tx.try_send(TransportCmd::Send(text)).is_err() {
                    log::warn!("[bayeux-link] Transport command queue unavailable");
                    self.handlers.emit_failed(BayeuxLinkError::WebSocketError(
                        "transport command queue unavailable".to_string(),
                    ));
                }
            },
            Err(e) => self.handlers.emit_failed(e),
        }
    }
}

/// The session task loop. Runs until shutdown or until every command sender
/// is dropped.
pub(crate) async fn session_task(
    mut session: Session,
    mut cmd_rx: mpsc::Receiver<Cmd>,
    mut event_rx: mpsc::Receiver<TransportEvent>,
) {
    log::debug!("[bayeux-link] Session task started");
    loop {
        let keepalive_armed = session.keepalive_deadline.is_some();
        let keepalive_at = session
            .keepalive_deadline
            .unwrap_or_else(|| TokioInstant::now() + FAR_FUTURE);
        let reconnect_armed = session.reconnect_deadline.is_some();
        let reconnect_at = session
            .reconnect_deadline
            .unwrap_or_else(|| TokioInstant::now() + FAR_FUTURE);

        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => match cmd {
                Some(Cmd::Shutdown) | None => break,
                Some(cmd) => session.handle_cmd(cmd),
            },

            event = event_rx.recv() => match event {
                Some(event) => session.handle_transport_event(event),
                None => {
                    log::warn!("[bayeux-link] Transport task ended");
                    break;
                },
            },

            _ = sleep_until(keepalive_at), if keepalive_armed => {
                session.keepalive_tick();
            },

            _ = sleep_until(reconnect_at), if reconnect_armed => {
                session.reconnect_tick();
            },
        }
    }

    if session.socket_open {
        let _ = session.transport_tx.try_send(TransportCmd::Close);
    }
    log::debug!("[bayeux-link] Session task stopped");
}

//! Session lifecycle event handlers for the Bayeux client.
//!
//! Provides callback-based hooks for monitoring the session:
//!
//! - [`on_connected`](EventHandlers::on_connected): the session reached `Connected`
//! - [`on_disconnected`](EventHandlers::on_disconnected): the session left `Connected`,
//!   cleanly or otherwise
//! - [`on_failed`](EventHandlers::on_failed): a protocol or transport error occurred
//! - [`on_subscription_succeeded`](EventHandlers::on_subscription_succeeded): a
//!   `/meta/subscribe` was acknowledged
//! - [`on_unexpected_message`](EventHandlers::on_unexpected_message): a message arrived
//!   on a channel with no local subscription
//! - [`on_advised_to_retry`](EventHandlers::on_advised_to_retry) /
//!   [`on_advised_to_handshake`](EventHandlers::on_advised_to_handshake): server advice
//!   interception points
//! - [`on_receive`](EventHandlers::on_receive) / [`on_send`](EventHandlers::on_send):
//!   raw-traffic debug hooks
//!
//! All handlers run on the session task. A caller that needs its own
//! execution context bridges inside the closure (for example into an
//! `mpsc` sender).
//!
//! # Example
//!
//! ```rust
//! use bayeux_link::EventHandlers;
//!
//! let handlers = EventHandlers::new()
//!     .on_connected(|| println!("connected"))
//!     .on_failed(|err| eprintln!("error: {}", err))
//!     .on_advised_to_retry(|interval| interval); // accept server-advised interval
//! ```

use crate::{error::BayeuxLinkError, message::Message};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Type alias for the on_connected callback.
pub type OnConnectedCallback = Arc<dyn Fn() + Send + Sync>;

/// Type alias for the on_disconnected callback. Receives the disconnect
/// acknowledgement (for clean disconnects) and the error that caused the
/// disconnect (for unclean ones); either may be absent.
pub type OnDisconnectedCallback =
    Arc<dyn Fn(Option<Message>, Option<BayeuxLinkError>) + Send + Sync>;

/// Type alias for the on_failed callback.
pub type OnFailedCallback = Arc<dyn Fn(BayeuxLinkError) + Send + Sync>;

/// Type alias for the on_subscription_succeeded callback.
pub type OnSubscriptionSucceededCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Type alias for the on_unexpected_message callback.
pub type OnUnexpectedMessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Type alias for the on_advised_to_retry callback: receives the
/// server-advised keep-alive interval and returns the interval to use.
pub type OnAdvisedToRetryCallback = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

/// Type alias for the on_advised_to_handshake callback: returns whether the
/// client should perform the advised re-handshake.
pub type OnAdvisedToHandshakeCallback = Arc<dyn Fn() -> bool + Send + Sync>;

/// Type alias for the raw inbound-traffic debug hook.
pub type OnReceiveCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Type alias for the raw outbound-traffic debug hook.
pub type OnSendCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Session lifecycle event handlers.
///
/// All handlers are optional; the builder pattern registers only the ones
/// you need. Handlers are `Send + Sync` so they work with the async tokio
/// runtime.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_connected: Option<OnConnectedCallback>,
    pub(crate) on_disconnected: Option<OnDisconnectedCallback>,
    pub(crate) on_failed: Option<OnFailedCallback>,
    pub(crate) on_subscription_succeeded: Option<OnSubscriptionSucceededCallback>,
    pub(crate) on_unexpected_message: Option<OnUnexpectedMessageCallback>,
    pub(crate) on_advised_to_retry: Option<OnAdvisedToRetryCallback>,
    pub(crate) on_advised_to_handshake: Option<OnAdvisedToHandshakeCallback>,
    pub(crate) on_receive: Option<OnReceiveCallback>,
    pub(crate) on_send: Option<OnSendCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connected", &self.on_connected.is_some())
            .field("on_disconnected", &self.on_disconnected.is_some())
            .field("on_failed", &self.on_failed.is_some())
            .field("on_subscription_succeeded", &self.on_subscription_succeeded.is_some())
            .field("on_unexpected_message", &self.on_unexpected_message.is_some())
            .field("on_advised_to_retry", &self.on_advised_to_retry.is_some())
            .field("on_advised_to_handshake", &self.on_advised_to_handshake.is_some())
            .field("on_receive", &self.on_receive.is_some())
            .field("on_send", &self.on_send.is_some())
            .finish()
    }
}

impl EventHandlers {
    /// Create a new empty `EventHandlers` (no callbacks registered).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked when the session reaches `Connected`.
    pub fn on_connected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connected = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when the session disconnects.
    ///
    /// For a clean disconnect the acknowledgement message is passed; for an
    /// unexpected transport close the error is passed instead.
    pub fn on_disconnected(
        mut self,
        f: impl Fn(Option<Message>, Option<BayeuxLinkError>) + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnected = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when a protocol or transport error occurs.
    pub fn on_failed(mut self, f: impl Fn(BayeuxLinkError) + Send + Sync + 'static) -> Self {
        self.on_failed = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when a subscription is acknowledged.
    /// Receives the channel path.
    pub fn on_subscription_succeeded(
        mut self,
        f: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.on_subscription_succeeded = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked for messages on channels with no local
    /// subscription.
    pub fn on_unexpected_message(
        mut self,
        f: impl Fn(Message) + Send + Sync + 'static,
    ) -> Self {
        self.on_unexpected_message = Some(Arc::new(f));
        self
    }

    /// Register a callback that can override the server-advised keep-alive
    /// interval. Returning `Duration::ZERO` resets it to the default.
    pub fn on_advised_to_retry(
        mut self,
        f: impl Fn(Duration) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.on_advised_to_retry = Some(Arc::new(f));
        self
    }

    /// Register a callback that decides whether to follow the server's
    /// re-handshake advice. Without a handler the advice is followed.
    pub fn on_advised_to_handshake(
        mut self,
        f: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_advised_to_handshake = Some(Arc::new(f));
        self
    }

    /// Register a debug hook receiving the raw JSON of every inbound frame.
    pub fn on_receive(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_receive = Some(Arc::new(f));
        self
    }

    /// Register a debug hook receiving the raw JSON of every outbound frame.
    pub fn on_send(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_send = Some(Arc::new(f));
        self
    }

    // ---------------------------------------------------------------
    // Internal dispatch helpers
    // ---------------------------------------------------------------

    pub(crate) fn emit_connected(&self) {
        if let Some(cb) = &self.on_connected {
            cb();
        }
    }

    pub(crate) fn emit_disconnected(
        &self,
        message: Option<Message>,
        error: Option<BayeuxLinkError>,
    ) {
        if let Some(cb) = &self.on_disconnected {
            cb(message, error);
        }
    }

    pub(crate) fn emit_failed(&self, error: BayeuxLinkError) {
        if let Some(cb) = &self.on_failed {
            cb(error);
        }
    }

    pub(crate) fn emit_subscription_succeeded(&self, channel: &str) {
        if let Some(cb) = &self.on_subscription_succeeded {
            cb(channel);
        }
    }

    pub(crate) fn emit_unexpected_message(&self, message: Message) {
        if let Some(cb) = &self.on_unexpected_message {
            cb(message);
        }
    }

    /// Give the delegate a chance to override the advised retry interval.
    /// Without a handler the advised interval is used as-is.
    pub(crate) fn advise_retry(&self, interval: Duration) -> Duration {
        match &self.on_advised_to_retry {
            Some(cb) => cb(interval),
            None => interval,
        }
    }

    /// Ask the delegate whether to follow re-handshake advice.
    /// Without a handler the advice is followed.
    pub(crate) fn advise_handshake(&self) -> bool {
        match &self.on_advised_to_handshake {
            Some(cb) => cb(),
            None => true,
        }
    }

    pub(crate) fn emit_receive(&self, raw: &str) {
        if let Some(cb) = &self.on_receive {
            cb(raw);
        }
    }

    pub(crate) fn emit_send(&self, raw: &str) {
        if let Some(cb) = &self.on_send {
            cb(raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_emit_without_handlers_is_noop() {
        let handlers = EventHandlers::new();
        handlers.emit_connected();
        handlers.emit_failed(BayeuxLinkError::ReceivedAdviceReconnectTypeNone);
        handlers.emit_subscription_succeeded("/chat");
        assert_eq!(handlers.advise_retry(Duration::from_secs(5)), Duration::from_secs(5));
        assert!(handlers.advise_handshake());
    }

    #[test]
    fn test_handlers_fire() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let handlers = EventHandlers::new().on_connected(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        handlers.emit_connected();
        handlers.emit_connected();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_advise_retry_override() {
        let handlers =
            EventHandlers::new().on_advised_to_retry(|_advised| Duration::from_secs(7));
        assert_eq!(handlers.advise_retry(Duration::from_secs(5)), Duration::from_secs(7));
    }

    #[test]
    fn test_advise_handshake_rejection() {
        let handlers = EventHandlers::new().on_advised_to_handshake(|| false);
        assert!(!handlers.advise_handshake());
    }

    #[test]
    fn test_debug_shows_registration() {
        let handlers = EventHandlers::new().on_connected(|| {});
        let debug = format!("{:?}", handlers);
        assert!(debug.contains("on_connected: true"));
        assert!(debug.contains("on_failed: false"));
    }
}

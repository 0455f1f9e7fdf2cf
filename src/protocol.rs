//! Outgoing envelope construction and inbound batch decoding.
//!
//! The encoder builds one [`Message`] per operation with exactly the
//! properties the protocol requires for that channel. Outbound WebSocket
//! frames carry a single JSON object; outbound HTTP bodies carry a
//! one-element JSON array. Inbound payloads are always JSON arrays of
//! message objects.

use crate::{
    error::{BayeuxLinkError, Result},
    message::{
        Message, Subscription, BAYEUX_MINIMUM_VERSION, BAYEUX_VERSION, CONNECTION_TYPE_WEBSOCKET,
    },
};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Generates opaque message ids unique within one session.
///
/// Ids look like `msg_1699000000.123456_42`; uniqueness across sessions is
/// not required.
#[derive(Debug, Default)]
pub(crate) struct MessageIdGenerator {
    counter: AtomicU64,
}

impl MessageIdGenerator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("msg_{:.6}_{}", now, seq)
    }
}

/// Build a `/meta/handshake` envelope. The only envelope that carries no
/// `clientId`.
pub(crate) fn handshake() -> Message {
    let mut msg = Message::new("/meta/handshake");
    msg.version = Some(BAYEUX_VERSION.to_string());
    msg.minimum_version = Some(BAYEUX_MINIMUM_VERSION.to_string());
    msg.supported_connection_types = Some(vec![CONNECTION_TYPE_WEBSOCKET.to_string()]);
    msg
}

/// Build a `/meta/connect` keep-alive envelope.
pub(crate) fn connect(client_id: &str, connection_type: &str, ext: Option<JsonValue>) -> Message {
    let mut msg = Message::new("/meta/connect");
    msg.client_id = Some(client_id.to_string());
    msg.connection_type = Some(connection_type.to_string());
    msg.ext = ext;
    msg
}

/// Build a `/meta/disconnect` envelope.
pub(crate) fn disconnect(client_id: &str) -> Message {
    let mut msg = Message::new("/meta/disconnect");
    msg.client_id = Some(client_id.to_string());
    msg
}

/// Build a `/meta/subscribe` envelope for one or more channels.
pub(crate) fn subscribe(
    client_id: &str,
    subscription: Subscription,
    ext: Option<JsonValue>,
) -> Message {
    let mut msg = Message::new("/meta/subscribe");
    msg.client_id = Some(client_id.to_string());
    msg.subscription = Some(subscription);
    msg.ext = ext;
    msg
}

/// Build a `/meta/unsubscribe` envelope for one or more channels.
pub(crate) fn unsubscribe(client_id: &str, subscription: Subscription) -> Message {
    let mut msg = Message::new("/meta/unsubscribe");
    msg.client_id = Some(client_id.to_string());
    msg.subscription = Some(subscription);
    msg
}

/// Build a publish envelope for an application channel.
pub(crate) fn publish(
    channel: &str,
    client_id: &str,
    data: JsonValue,
    id: String,
    ext: Option<JsonValue>,
) -> Message {
    let mut msg = Message::new(channel);
    msg.client_id = Some(client_id.to_string());
    msg.data = Some(data);
    msg.id = Some(id);
    msg.ext = ext;
    msg
}

/// Serialize a single envelope for a WebSocket text frame.
pub(crate) fn encode_frame(msg: &Message) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| BayeuxLinkError::MalformedObjectData(e.to_string()))
}

/// Serialize a one-element batch for an HTTP body.
pub(crate) fn encode_http_batch(msg: &Message) -> Result<String> {
    serde_json::to_string(&[msg]).map_err(|e| BayeuxLinkError::MalformedObjectData(e.to_string()))
}

/// Decode an inbound payload into its messages.
///
/// Inbound payloads must be JSON arrays of message objects; anything else
/// is malformed.
pub(crate) fn decode_batch(text: &str) -> Result<Vec<Message>> {
    let value: JsonValue = serde_json::from_str(text)
        .map_err(|e| BayeuxLinkError::MalformedJsonData(e.to_string()))?;
    if !value.is_array() {
        return Err(BayeuxLinkError::MalformedJsonData(
            "expected a JSON array of messages".to_string(),
        ));
    }
    serde_json::from_value(value).map_err(|e| BayeuxLinkError::MalformedJsonData(e.to_string()))
}

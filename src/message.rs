//! Bayeux wire envelope and channel types.
//!
//! Defines the [`Message`] envelope used for both inbound and outbound
//! traffic, the server [`Advice`] object, and the five reserved
//! [`MetaChannel`] paths that carry session-control replies.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Bayeux protocol version advertised on handshake.
pub const BAYEUX_VERSION: &str = "1.0";

/// Minimum Bayeux protocol version advertised on handshake.
pub const BAYEUX_MINIMUM_VERSION: &str = "1.0beta";

/// The only connection type this client supports.
pub const CONNECTION_TYPE_WEBSOCKET: &str = "websocket";

/// Prefix shared by all reserved session-control channels.
pub const META_CHANNEL_PREFIX: &str = "/meta";

/// A single Bayeux envelope, both inbound and outbound.
///
/// Every property except `channel` is optional. Per the wire format, an
/// absent `ext` or `advice` serializes as JSON `null` rather than being
/// omitted; all other absent properties are omitted entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Channel path; always begins with `/`.
    pub channel: String,

    /// Session identity assigned by the server on successful handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Client-chosen correlation token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Whether a meta-channel request succeeded (inbound acknowledgements).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,

    /// Channel path(s) on subscribe/unsubscribe envelopes and their acks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,

    /// Arbitrary JSON payload on published messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,

    /// Server instruction about reconnection semantics. Serialized as
    /// `null` when absent.
    #[serde(default)]
    pub advice: Option<Advice>,

    /// Opaque extension object forwarded between client and server.
    /// Serialized as `null` when absent.
    #[serde(default)]
    pub ext: Option<JsonValue>,

    /// Transport names offered by either side (handshake only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,

    /// Negotiated transport name (`/meta/connect` envelopes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,

    /// Human-readable error string on unsuccessful responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Protocol version (handshake only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Minimum protocol version (handshake only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_version: Option<String>,
}

impl Message {
    /// Create an empty envelope addressed to `channel`.
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            client_id: None,
            id: None,
            successful: None,
            subscription: None,
            data: None,
            advice: None,
            ext: None,
            supported_connection_types: None,
            connection_type: None,
            error: None,
            version: None,
            minimum_version: None,
        }
    }

    /// Whether this is a successful meta-channel acknowledgement.
    pub fn is_successful(&self) -> bool {
        self.successful == Some(true)
    }

    /// The meta channel this envelope belongs to, if any.
    pub fn meta_channel(&self) -> Option<MetaChannel> {
        MetaChannel::from_channel(&self.channel)
    }

    /// The error string of an unsuccessful reply, or an empty string.
    pub fn error_message(&self) -> String {
        self.error.clone().unwrap_or_default()
    }
}

/// Channel path(s) carried by the `subscription` property; the server may
/// reply with either a single string or an array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Subscription {
    /// A single channel path.
    Single(String),
    /// Multiple channel paths (aggregated subscribe/unsubscribe).
    Many(Vec<String>),
}

impl Subscription {
    /// Build from a channel list, collapsing a one-element list to the
    /// single-string form.
    pub fn from_channels(channels: &[String]) -> Self {
        if channels.len() == 1 {
            Self::Single(channels[0].clone())
        } else {
            Self::Many(channels.to_vec())
        }
    }

    /// The channel paths named by this subscription.
    pub fn channels(&self) -> Vec<String> {
        match self {
            Self::Single(c) => vec![c.clone()],
            Self::Many(cs) => cs.clone(),
        }
    }

    /// Whether `channel` is one of the named paths.
    pub fn contains(&self, channel: &str) -> bool {
        match self {
            Self::Single(c) => c == channel,
            Self::Many(cs) => cs.iter().any(|c| c == channel),
        }
    }
}

/// Server-attached instruction about reconnection semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    /// How the client should re-establish the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<ReconnectAdvice>,

    /// Server-suggested retry interval in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
}

/// Value of `advice.reconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectAdvice {
    /// Keep the session; retry `/meta/connect` on the advised interval.
    Retry,
    /// Discard the session identity and perform a new handshake.
    Handshake,
    /// The server has terminated the session.
    None,
}

/// The five reserved meta channels carrying session-control replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaChannel {
    /// `/meta/handshake`
    Handshake,
    /// `/meta/connect`
    Connect,
    /// `/meta/disconnect`
    Disconnect,
    /// `/meta/subscribe`
    Subscribe,
    /// `/meta/unsubscribe`
    Unsubscribe,
}

impl MetaChannel {
    /// All five meta channels, in dispatch order.
    pub const ALL: [MetaChannel; 5] = [
        MetaChannel::Handshake,
        MetaChannel::Connect,
        MetaChannel::Disconnect,
        MetaChannel::Subscribe,
        MetaChannel::Unsubscribe,
    ];

    /// The channel path string.
    pub const fn channel(self) -> &'static str {
        match self {
            MetaChannel::Handshake => "/meta/handshake",
            MetaChannel::Connect => "/meta/connect",
            MetaChannel::Disconnect => "/meta/disconnect",
            MetaChannel::Subscribe => "/meta/subscribe",
            MetaChannel::Unsubscribe => "/meta/unsubscribe",
        }
    }

    /// Parse a channel path into one of the known meta channels.
    pub fn from_channel(channel: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.channel() == channel)
    }
}

impl std::fmt::Display for MetaChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.channel())
    }
}

/// Whether `channel` is a well-formed Bayeux channel path.
pub fn is_valid_channel(channel: &str) -> bool {
    channel.starts_with('/') && channel.len() > 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serializes_camel_case() {
        let mut msg = Message::new("/meta/connect");
        msg.client_id = Some("abc".to_string());
        msg.connection_type = Some(CONNECTION_TYPE_WEBSOCKET.to_string());

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"clientId\":\"abc\""));
        assert!(json.contains("\"connectionType\":\"websocket\""));
        // Absent ext/advice are sent as explicit nulls
        assert!(json.contains("\"ext\":null"));
        assert!(json.contains("\"advice\":null"));
        // Absent data is omitted entirely
        assert!(!json.contains("\"data\""));
    }

    #[test]
    fn test_message_round_trip() {
        let mut msg = Message::new("/chat/room1");
        msg.client_id = Some("client1".to_string());
        msg.id = Some("msg_1".to_string());
        msg.data = Some(json!({"text": "hello"}));
        msg.ext = Some(json!({"token": "t"}));

        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_inbound_handshake_reply_parses() {
        let json = r#"{
            "channel": "/meta/handshake",
            "successful": true,
            "clientId": "abc123",
            "supportedConnectionTypes": ["websocket", "long-polling"],
            "version": "1.0"
        }"#;

        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.meta_channel(), Some(MetaChannel::Handshake));
        assert!(msg.is_successful());
        assert_eq!(msg.client_id.as_deref(), Some("abc123"));
        assert_eq!(
            msg.supported_connection_types.as_deref(),
            Some(&["websocket".to_string(), "long-polling".to_string()][..])
        );
    }

    #[test]
    fn test_advice_parses() {
        let json = r#"{
            "channel": "/meta/connect",
            "successful": false,
            "advice": {"reconnect": "retry", "interval": 5000}
        }"#;

        let msg: Message = serde_json::from_str(json).unwrap();
        let advice = msg.advice.unwrap();
        assert_eq!(advice.reconnect, Some(ReconnectAdvice::Retry));
        assert_eq!(advice.interval, Some(5000));
    }

    #[test]
    fn test_null_advice_and_ext_decode_as_none() {
        let json = r#"{"channel": "/meta/connect", "advice": null, "ext": null}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert!(msg.advice.is_none());
        assert!(msg.ext.is_none());
    }

    #[test]
    fn test_subscription_single_and_array() {
        let single: Subscription = serde_json::from_str(r#""/chat/room1""#).unwrap();
        assert_eq!(single, Subscription::Single("/chat/room1".to_string()));

        let many: Subscription = serde_json::from_str(r#"["/a", "/b"]"#).unwrap();
        assert_eq!(many.channels(), vec!["/a".to_string(), "/b".to_string()]);
        assert!(many.contains("/a"));
        assert!(!many.contains("/c"));
    }

    #[test]
    fn test_subscription_from_channels_collapses_single() {
        let sub = Subscription::from_channels(&["/only".to_string()]);
        assert_eq!(serde_json::to_string(&sub).unwrap(), r#""/only""#);

        let sub = Subscription::from_channels(&["/a".to_string(), "/b".to_string()]);
        assert_eq!(serde_json::to_string(&sub).unwrap(), r#"["/a","/b"]"#);
    }

    #[test]
    fn test_meta_channel_mapping() {
        for meta in MetaChannel::ALL {
            assert_eq!(MetaChannel::from_channel(meta.channel()), Some(meta));
        }
        assert_eq!(MetaChannel::from_channel("/meta/ping"), None);
        assert_eq!(MetaChannel::from_channel("/chat/room1"), None);
    }

    #[test]
    fn test_channel_validation() {
        assert!(is_valid_channel("/chat/room1"));
        assert!(is_valid_channel("/a"));
        assert!(!is_valid_channel("chat/room1"));
        assert!(!is_valid_channel("/"));
        assert!(!is_valid_channel(""));
    }

    #[test]
    fn test_reconnect_advice_wire_names() {
        assert_eq!(serde_json::to_string(&ReconnectAdvice::Retry).unwrap(), "\"retry\"");
        assert_eq!(serde_json::to_string(&ReconnectAdvice::Handshake).unwrap(), "\"handshake\"");
        assert_eq!(serde_json::to_string(&ReconnectAdvice::None).unwrap(), "\"none\"");
    }
}

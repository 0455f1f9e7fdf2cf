//! Error types for bayeux-link client operations.
//!
//! Provides a comprehensive error enum covering all failure scenarios
//! including transport errors, protocol violations, and unsuccessful
//! meta-channel acknowledgements.

use std::fmt;

/// Result type alias using [`BayeuxLinkError`]
pub type Result<T> = std::result::Result<T, BayeuxLinkError>;

/// Errors that can occur during bayeux-link operations.
///
/// Protocol failures (handshake rejections, advice-driven termination,
/// malformed payloads) are surfaced asynchronously through
/// [`EventHandlers::on_failed`](crate::EventHandlers::on_failed) or
/// [`EventHandlers::on_disconnected`](crate::EventHandlers::on_disconnected);
/// no public API call returns them synchronously.
#[derive(Debug, Clone)]
pub enum BayeuxLinkError {
    /// A send was requested while the WebSocket was not open
    SocketNotOpen(String),

    /// The transport closed unexpectedly (non-clean, or with a reason)
    SocketClosed {
        /// WebSocket close code, if available (e.g. 1000 = normal, 1006 = abnormal)
        code: Option<u16>,
        /// Close reason supplied by the peer
        reason: String,
    },

    /// The HTTP handshake response was not 200
    HttpUnexpectedStatusCode(u16),

    /// An inbound payload failed to decode, or was not a JSON array
    MalformedJsonData(String),

    /// An outbound value failed to encode
    MalformedObjectData(String),

    /// A message arrived on a `/meta/*` channel outside the known five
    UnhandledMetaChannelMessage(String),

    /// The handshake reply advertised none of the client-supported transports
    NoCommonSupportedConnectionType(Vec<String>),

    /// The handshake reply was unsuccessful
    HandshakeFailed(String),

    /// A `/meta/connect` was unsuccessful after handshake
    ConnectFailed(String),

    /// A `/meta/subscribe` reply was unsuccessful
    SubscribeFailed {
        /// Channels named by the reply's `subscription` field
        channels: Vec<String>,
        /// Error string from the server
        message: String,
    },

    /// A `/meta/unsubscribe` reply was unsuccessful
    UnsubscribeFailed {
        /// Channels named by the reply's `subscription` field
        channels: Vec<String>,
        /// Error string from the server
        message: String,
    },

    /// The server terminated the session with `advice.reconnect = "none"`
    ReceivedAdviceReconnectTypeNone,

    /// Network or HTTP request errors
    NetworkError(String),

    /// WebSocket connection or protocol errors
    WebSocketError(String),

    /// Connection timeout
    TimeoutError(String),

    /// Invalid configuration (bad URL scheme, malformed channel path)
    ConfigurationError(String),
}

impl fmt::Display for BayeuxLinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SocketNotOpen(msg) => write!(f, "Socket not open: {}", msg),
            Self::SocketClosed { code, reason } => match code {
                Some(code) => write!(f, "Socket closed ({}): {}", code, reason),
                None => write!(f, "Socket closed: {}", reason),
            },
            Self::HttpUnexpectedStatusCode(status) => {
                write!(f, "Unexpected HTTP status code: {}", status)
            },
            Self::MalformedJsonData(msg) => write!(f, "Malformed JSON data: {}", msg),
            Self::MalformedObjectData(msg) => write!(f, "Malformed object data: {}", msg),
            Self::UnhandledMetaChannelMessage(channel) => {
                write!(f, "Unhandled meta channel message: {}", channel)
            },
            Self::NoCommonSupportedConnectionType(types) => {
                write!(f, "No common supported connection type; server offered: {:?}", types)
            },
            Self::HandshakeFailed(msg) => write!(f, "Handshake failed: {}", msg),
            Self::ConnectFailed(msg) => write!(f, "Connect failed: {}", msg),
            Self::SubscribeFailed { channels, message } => {
                write!(f, "Subscribe failed for {:?}: {}", channels, message)
            },
            Self::UnsubscribeFailed { channels, message } => {
                write!(f, "Unsubscribe failed for {:?}: {}", channels, message)
            },
            Self::ReceivedAdviceReconnectTypeNone => {
                write!(f, "Server advised reconnect type none; session terminated")
            },
            Self::NetworkError(msg) => write!(f, "Network error: {}", msg),
            Self::WebSocketError(msg) => write!(f, "WebSocket error: {}", msg),
            Self::TimeoutError(msg) => write!(f, "Timeout: {}", msg),
            Self::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for BayeuxLinkError {}

impl From<serde_json::Error> for BayeuxLinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedJsonData(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BayeuxLinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocketError(err.to_string())
    }
}

impl From<reqwest::Error> for BayeuxLinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::TimeoutError(err.to_string())
        } else if let Some(status) = err.status() {
            Self::HttpUnexpectedStatusCode(status.as_u16())
        } else {
            Self::NetworkError(err.to_string())
        }
    }
}

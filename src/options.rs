//! Connection tunables for the Bayeux client.
//!
//! Covers keep-alive and reconnection timing plus the two handshake policy
//! flags. All fields have serde defaults so partial configurations can be
//! loaded from JSON.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default keep-alive period between `/meta/connect` envelopes (45 s).
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 45_000;

/// Default delay before reconnecting after a transport-level failure (1 s).
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 1_000;

/// Default timeout for establishing the WebSocket (10 s).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Connection-level options for the Bayeux client.
///
/// # Example
///
/// ```rust
/// use bayeux_link::ConnectionOptions;
///
/// let options = ConnectionOptions::new()
///     .with_retry_interval_ms(30_000)
///     .with_reconnect_interval_ms(Some(2_000))
///     .with_await_only_handshake(true);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Keep-alive period in milliseconds between `/meta/connect` envelopes.
    /// The server may override this via `advice.interval`.
    /// Default: 45000 ms.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Delay in milliseconds before reconnecting after a transport failure.
    /// `None` disables transport-failure reconnection entirely.
    /// Default: 1000 ms.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: Option<u64>,

    /// When true, the handshake may be sent over HTTP in parallel with the
    /// WebSocket opening; when false it is sent only once the socket is open.
    /// Default: false.
    #[serde(default)]
    pub may_send_handshake_async: bool,

    /// When true, the connect-success callback fires as soon as the handshake
    /// succeeds; when false it waits for the first `/meta/connect`
    /// acknowledgement.
    /// Default: true.
    #[serde(default = "default_await_only_handshake")]
    pub await_only_handshake: bool,

    /// Timeout in milliseconds for establishing the WebSocket connection.
    /// Zero disables the timeout.
    /// Default: 10000 ms.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}

fn default_reconnect_interval_ms() -> Option<u64> {
    Some(DEFAULT_RECONNECT_INTERVAL_MS)
}

fn default_await_only_handshake() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            reconnect_interval_ms: Some(DEFAULT_RECONNECT_INTERVAL_MS),
            may_send_handshake_async: false,
            await_only_handshake: true,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl ConnectionOptions {
    /// Create new connection options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the keep-alive period between `/meta/connect` envelopes.
    pub fn with_retry_interval_ms(mut self, ms: u64) -> Self {
        self.retry_interval_ms = ms;
        self
    }

    /// Set the delay before reconnecting after a transport failure.
    /// Pass `None` to disable transport-failure reconnection.
    pub fn with_reconnect_interval_ms(mut self, ms: Option<u64>) -> Self {
        self.reconnect_interval_ms = ms;
        self
    }

    /// Set whether the handshake may go out over HTTP while the socket opens.
    pub fn with_may_send_handshake_async(mut self, enabled: bool) -> Self {
        self.may_send_handshake_async = enabled;
        self
    }

    /// Set whether connect success is signalled at handshake time or at the
    /// first `/meta/connect` acknowledgement.
    pub fn with_await_only_handshake(mut self, enabled: bool) -> Self {
        self.await_only_handshake = enabled;
        self
    }

    /// Set the WebSocket establishment timeout. Zero disables it.
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Keep-alive period as a [`Duration`].
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Reconnect delay as a [`Duration`], or `None` when disabled.
    pub fn reconnect_interval(&self) -> Option<Duration> {
        self.reconnect_interval_ms.map(Duration::from_millis)
    }

    /// WebSocket establishment timeout, or `None` when disabled.
    pub fn connect_timeout(&self) -> Option<Duration> {
        if self.connect_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.connect_timeout_ms))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = ConnectionOptions::default();
        assert_eq!(opts.retry_interval_ms, 45_000);
        assert_eq!(opts.reconnect_interval_ms, Some(1_000));
        assert!(!opts.may_send_handshake_async);
        assert!(opts.await_only_handshake);
        assert_eq!(opts.connect_timeout_ms, 10_000);
    }

    #[test]
    fn test_builder_pattern() {
        let opts = ConnectionOptions::new()
            .with_retry_interval_ms(5_000)
            .with_reconnect_interval_ms(None)
            .with_may_send_handshake_async(true)
            .with_await_only_handshake(false)
            .with_connect_timeout_ms(0);

        assert_eq!(opts.retry_interval(), Duration::from_secs(5));
        assert!(opts.reconnect_interval().is_none());
        assert!(opts.may_send_handshake_async);
        assert!(!opts.await_only_handshake);
        assert!(opts.connect_timeout().is_none());
    }

    #[test]
    fn test_deserialization_with_defaults() {
        let opts: ConnectionOptions =
            serde_json::from_str(r#"{"retry_interval_ms": 2000}"#).unwrap();
        assert_eq!(opts.retry_interval_ms, 2_000);
        assert_eq!(opts.reconnect_interval_ms, Some(1_000));
        assert!(opts.await_only_handshake);
    }

    #[test]
    fn test_serialization_round_trip() {
        let opts = ConnectionOptions::new()
            .with_retry_interval_ms(100)
            .with_reconnect_interval_ms(Some(200));
        let json = serde_json::to_string(&opts).unwrap();
        let parsed: ConnectionOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.retry_interval_ms, 100);
        assert_eq!(parsed.reconnect_interval_ms, Some(200));
    }
}

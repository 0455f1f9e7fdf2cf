//! The public Bayeux client with builder pattern.
//!
//! Provides the primary interface for connecting to a Bayeux server,
//! subscribing to channels, and publishing messages.

use crate::{
    error::{BayeuxLinkError, Result},
    event_handlers::EventHandlers,
    options::ConnectionOptions,
    reachability::{ReachabilityProbe, TcpProbe},
    session::{self, Cmd, ConnectCallback, MessageCallback, SharedStatus},
    transport::{self, TransportHandle},
};
use serde_json::Value as JsonValue;
use std::sync::{atomic::Ordering, Arc};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Capacity of the command channel into the session task.
const CMD_CHANNEL_CAPACITY: usize = 64;

/// Default timeout for the HTTP handshake request.
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An async Bayeux 1.0 client.
///
/// Use [`BayeuxClient::builder`] to construct instances. The client owns a
/// background session task; dropping the last handle shuts the session
/// down, so hold the client for as long as the session should live.
///
/// All mutating calls are fire-and-forget: failures surface asynchronously
/// through the registered [`EventHandlers`], never as synchronous errors.
///
/// # Examples
///
/// ```rust,no_run
/// use bayeux_link::{BayeuxClient, EventHandlers};
///
/// # async fn example() -> bayeux_link::Result<()> {
/// let client = BayeuxClient::builder()
///     .url("wss://example.com/bayeux")
///     .event_handlers(EventHandlers::new().on_connected(|| println!("up")))
///     .build()?;
///
/// client.connect().await;
/// client
///     .subscribe("/chat/room1", |channel, data| {
///         println!("{}: {}", channel, data);
///     }, None)
///     .await;
/// # Ok(())
/// # }
/// ```
pub struct BayeuxClient {
    cmd_tx: mpsc::Sender<Cmd>,
    status: Arc<SharedStatus>,
    _task: JoinHandle<()>,
}

impl BayeuxClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> BayeuxClientBuilder {
        BayeuxClientBuilder::new()
    }

    /// Begin connecting: open the socket, handshake, then keep the session
    /// alive with periodic `/meta/connect` envelopes.
    pub async fn connect(&self) {
        self.send(Cmd::Connect {
            extension: None,
            on_success: None,
        })
        .await;
    }

    /// Like [`connect`](Self::connect), recording `extension` to be passed
    /// on every `/meta/connect` and invoking `on_success` once the session
    /// is connected (per the `await_only_handshake` policy).
    pub async fn connect_with(
        &self,
        extension: Option<JsonValue>,
        on_success: impl Fn() + Send + Sync + 'static,
    ) {
        let callback: ConnectCallback = Arc::new(on_success);
        self.send(Cmd::Connect {
            extension,
            on_success: Some(callback),
        })
        .await;
    }

    /// Gracefully end the session. Idempotent. If no `clientId` has been
    /// assigned yet, the disconnect is deferred until the in-flight
    /// handshake completes.
    pub async fn disconnect(&self) {
        self.send(Cmd::Disconnect).await;
    }

    /// Re-establish the session and restore every subscribed channel.
    pub async fn reconnect(&self) {
        self.send(Cmd::Reconnect).await;
    }

    /// Subscribe `callback` to a single channel and send `/meta/subscribe`.
    pub async fn subscribe(
        &self,
        channel: &str,
        callback: impl Fn(&str, &JsonValue) + Send + Sync + 'static,
        extension: Option<JsonValue>,
    ) {
        self.subscribe_many(&[channel], callback, extension).await;
    }

    /// Subscribe one shared `callback` to several channels with a single
    /// aggregated `/meta/subscribe` envelope.
    pub async fn subscribe_many(
        &self,
        channels: &[&str],
        callback: impl Fn(&str, &JsonValue) + Send + Sync + 'static,
        extension: Option<JsonValue>,
    ) {
        let callback: MessageCallback = Arc::new(callback);
        self.send(Cmd::Subscribe {
            channels: channels.iter().map(|c| c.to_string()).collect(),
            callback,
            extension,
        })
        .await;
    }

    /// Remove the local subscription for `channel` and send
    /// `/meta/unsubscribe`. Local removal is eager.
    pub async fn unsubscribe(&self, channel: &str) {
        self.unsubscribe_many(&[channel]).await;
    }

    /// Remove several channels with one aggregated `/meta/unsubscribe`.
    pub async fn unsubscribe_many(&self, channels: &[&str]) {
        self.send(Cmd::Unsubscribe {
            channels: channels.iter().map(|c| c.to_string()).collect(),
        })
        .await;
    }

    /// Send `/meta/unsubscribe` for every registered subscription. Local
    /// entries are removed as the acknowledgements arrive.
    pub async fn unsubscribe_all(&self) {
        self.send(Cmd::UnsubscribeAll).await;
    }

    /// Publish `data` to an application channel.
    pub async fn publish(&self, data: JsonValue, channel: &str, extension: Option<JsonValue>) {
        self.send(Cmd::Publish {
            channel: channel.to_string(),
            data,
            extension,
        })
        .await;
    }

    /// The channels currently registered in the subscription registry,
    /// sorted.
    pub async fn subscribed_channels(&self) -> Vec<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Cmd::SubscribedChannels { reply: reply_tx }).await;
        reply_rx.await.unwrap_or_default()
    }

    /// Whether the session is currently connected.
    pub fn is_connected(&self) -> bool {
        self.status.connected.load(Ordering::SeqCst)
    }

    /// Whether the session is handshaking or awaiting its first connection.
    pub fn is_connecting(&self) -> bool {
        self.status.connecting.load(Ordering::SeqCst)
    }

    /// Whether a reconnect sequence is in progress.
    pub fn is_reconnecting(&self) -> bool {
        self.status.reconnecting.load(Ordering::SeqCst)
    }

    async fn send(&self, cmd: Cmd) {
        if self.cmd_tx.send(cmd).await.is_err() {
            log::warn!("[bayeux-link] Session task is not running");
        }
    }
}

impl Drop for BayeuxClient {
    fn drop(&mut self) {
        // Best-effort shutdown signal.
        let _ = self.cmd_tx.try_send(Cmd::Shutdown);
    }
}

/// Builder for configuring [`BayeuxClient`] instances.
pub struct BayeuxClientBuilder {
    url: Option<String>,
    options: ConnectionOptions,
    event_handlers: EventHandlers,
    reachability: Option<Arc<dyn ReachabilityProbe>>,
    transport: Option<TransportHandle>,
    http_client: Option<reqwest::Client>,
}

impl Default for BayeuxClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BayeuxClientBuilder {
    fn new() -> Self {
        Self {
            url: None,
            options: ConnectionOptions::default(),
            event_handlers: EventHandlers::new(),
            reachability: None,
            transport: None,
            http_client: None,
        }
    }

    /// Set the server endpoint. The scheme must be one of `ws`, `wss`,
    /// `http`, or `https`; the sibling URL for the other protocol is
    /// derived automatically.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the connection options (intervals, handshake policy flags).
    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the session lifecycle event handlers.
    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Set a custom reachability probe. Defaults to a TCP connect poll.
    pub fn reachability(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.reachability = Some(probe);
        self
    }

    /// Set a custom transport. Defaults to the built-in WebSocket
    /// transport; tests and alternative stacks supply a
    /// [`TransportHandle::pair`] here.
    pub fn transport(mut self, transport: TransportHandle) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set a custom HTTP client for the async-handshake path.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Build the client and spawn its session task.
    ///
    /// Must be called within a tokio runtime.
    pub fn build(self) -> Result<BayeuxClient> {
        let url = self
            .url
            .ok_or_else(|| BayeuxLinkError::ConfigurationError("url is required".into()))?;

        let ws_url = transport::resolve_ws_url(&url)?;
        let http_url = transport::resolve_http_url(&url)?;
        let (ws_host, ws_port) = transport::host_and_port(&ws_url)?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .timeout(HTTP_REQUEST_TIMEOUT)
                .build()
                .map_err(|e| BayeuxLinkError::ConfigurationError(e.to_string()))?,
        };

        let transport = match self.transport {
            Some(handle) => handle,
            None => transport::spawn_websocket_transport(ws_url, self.options.connect_timeout()),
        };
        let TransportHandle { cmd_tx: transport_tx, event_rx } = transport;

        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let status = Arc::new(SharedStatus::default());
        let reachability = self.reachability.unwrap_or_else(TcpProbe::shared);

        let session = session::Session::new(
            self.options,
            self.event_handlers,
            http_client,
            http_url,
            ws_host,
            ws_port,
            reachability,
            status.clone(),
            transport_tx,
            cmd_tx.clone(),
        );
        let task = tokio::spawn(session::session_task(session, cmd_rx, event_rx));

        Ok(BayeuxClient {
            cmd_tx,
            status,
            _task: task,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builder_requires_url() {
        let result = BayeuxClient::builder().build();
        assert!(matches!(result, Err(BayeuxLinkError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn test_builder_rejects_unknown_scheme() {
        let result = BayeuxClient::builder().url("ftp://example.com/bayeux").build();
        assert!(matches!(result, Err(BayeuxLinkError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn test_builder_accepts_all_supported_schemes() {
        for url in [
            "ws://example.com/bayeux",
            "wss://example.com/bayeux",
            "http://example.com/bayeux",
            "https://example.com/bayeux",
        ] {
            let client = BayeuxClient::builder().url(url).build().unwrap();
            assert!(!client.is_connected());
            assert!(!client.is_connecting());
            assert!(!client.is_reconnecting());
        }
    }

    #[tokio::test]
    async fn test_registry_tracks_subscribe_and_unsubscribe() {
        let (handle, _peer) = TransportHandle::pair();
        let client = BayeuxClient::builder()
            .url("wss://example.com/bayeux")
            .transport(handle)
            .build()
            .unwrap();

        client.subscribe("/chat/room1", |_, _| {}, None).await;
        client.subscribe_many(&["/a", "/b"], |_, _| {}, None).await;
        assert_eq!(
            client.subscribed_channels().await,
            vec!["/a".to_string(), "/b".to_string(), "/chat/room1".to_string()]
        );

        client.unsubscribe("/a").await;
        assert_eq!(
            client.subscribed_channels().await,
            vec!["/b".to_string(), "/chat/room1".to_string()]
        );
    }
}

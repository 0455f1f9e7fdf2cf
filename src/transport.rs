//! WebSocket transport adapter.
//!
//! The session task never touches the socket directly. It drives a
//! transport task through [`TransportCmd`] messages and observes
//! [`TransportEvent`] messages in return: open / send-text / close going
//! out, opened / text / closed / failed coming back. The default
//! implementation pumps a tokio-tungstenite stream; alternative transports
//! (including test doubles) provide the same channel pair via
//! [`TransportHandle::pair`].

use crate::error::{BayeuxLinkError, Result};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{error::Error as WsError, protocol::Message as WsMessage},
};

type WebSocketStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Channel capacity for transport commands and events.
const TRANSPORT_CHANNEL_CAPACITY: usize = 256;

/// Commands from the session task to the transport.
#[derive(Debug)]
pub enum TransportCmd {
    /// Establish the connection. Ignored while already open.
    Open,
    /// Send a text frame. The session guards against sends while closed.
    Send(String),
    /// Close the connection cleanly.
    Close,
}

/// Events from the transport to the session task.
#[derive(Debug)]
pub enum TransportEvent {
    /// The connection is established and ready for traffic.
    Opened,
    /// A text frame arrived.
    Text(String),
    /// The connection closed.
    Closed {
        /// WebSocket close code, if the peer supplied one.
        code: Option<u16>,
        /// Close reason, if any.
        reason: String,
        /// Whether the close was a clean protocol-level close.
        was_clean: bool,
    },
    /// The connection failed at the transport level.
    Failed(TransportFailure),
}

/// A transport-level failure with its recovery classification.
#[derive(Debug, Clone)]
pub struct TransportFailure {
    /// Human-readable description.
    pub message: String,
    /// Recovery classification derived from the underlying OS error.
    pub class: FailureClass,
}

impl TransportFailure {
    /// Create a new failure.
    pub fn new(message: impl Into<String>, class: FailureClass) -> Self {
        Self {
            message: message.into(),
            class,
        }
    }
}

/// Recovery classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The network or remote host is unreachable; wait for reachability
    /// before reconnecting.
    NetworkUnreachable,
    /// The connection was reset, refused, or timed out; reconnect after the
    /// configured delay.
    ConnectionLost,
    /// Anything else; no automatic recovery.
    Other,
}

/// Classify an I/O error into a recovery class.
pub(crate) fn classify_io_error(err: &std::io::Error) -> FailureClass {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::NetworkDown | ErrorKind::NetworkUnreachable | ErrorKind::HostUnreachable => {
            FailureClass::NetworkUnreachable
        },
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionRefused
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe
        | ErrorKind::TimedOut => FailureClass::ConnectionLost,
        _ => FailureClass::Other,
    }
}

/// Classify a WebSocket error into a recovery class.
pub(crate) fn classify_ws_error(err: &WsError) -> FailureClass {
    match err {
        WsError::Io(io) => classify_io_error(io),
        WsError::ConnectionClosed | WsError::AlreadyClosed => FailureClass::ConnectionLost,
        _ => FailureClass::Other,
    }
}

/// The session-side handle to a transport: a command sender and an event
/// receiver.
pub struct TransportHandle {
    /// Command sender into the transport.
    pub cmd_tx: mpsc::Sender<TransportCmd>,
    /// Event receiver from the transport.
    pub event_rx: mpsc::Receiver<TransportEvent>,
}

/// The transport-side counterpart of a [`TransportHandle`], for custom
/// transport implementations.
pub struct TransportPeer {
    /// Command receiver from the session.
    pub cmd_rx: mpsc::Receiver<TransportCmd>,
    /// Event sender into the session.
    pub event_tx: mpsc::Sender<TransportEvent>,
}

impl TransportHandle {
    /// Create a connected handle/peer pair for a custom transport.
    pub fn pair() -> (TransportHandle, TransportPeer) {
        let (cmd_tx, cmd_rx) = mpsc::channel(TRANSPORT_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(TRANSPORT_CHANNEL_CAPACITY);
        (TransportHandle { cmd_tx, event_rx }, TransportPeer { cmd_rx, event_tx })
    }
}

/// Spawn the default WebSocket transport task for `ws_url`.
///
/// The task stays idle until the first [`TransportCmd::Open`] and serves
/// open/close cycles until the command channel is dropped.
pub(crate) fn spawn_websocket_transport(
    ws_url: String,
    connect_timeout: Option<Duration>,
) -> TransportHandle {
    let (handle, peer) = TransportHandle::pair();
    tokio::spawn(websocket_task(ws_url, connect_timeout, peer));
    handle
}

async fn websocket_task(ws_url: String, connect_timeout: Option<Duration>, peer: TransportPeer) {
    let TransportPeer {
        mut cmd_rx,
        event_tx,
    } = peer;
    let mut stream: Option<WebSocketStream> = None;

    loop {
        if let Some(ws) = stream.as_mut() {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(TransportCmd::Open) => {}, // already open
                    Some(TransportCmd::Send(text)) => {
                        if let Err(e) = ws.send(WsMessage::Text(text.into())).await {
                            log::warn!("[bayeux-link] WebSocket send failed: {}", e);
                            let class = classify_ws_error(&e);
                            let _ = event_tx
                                .send(TransportEvent::Failed(TransportFailure::new(e.to_string(), class)))
                                .await;
                            let _ = event_tx
                                .send(TransportEvent::Closed {
                                    code: None,
                                    reason: format!("send failed: {}", e),
                                    was_clean: false,
                                })
                                .await;
                            stream = None;
                        }
                    },
                    Some(TransportCmd::Close) => {
                        let _ = ws.close(None).await;
                        let _ = event_tx
                            .send(TransportEvent::Closed {
                                code: None,
                                reason: String::new(),
                                was_clean: true,
                            })
                            .await;
                        stream = None;
                    },
                    None => {
                        let _ = ws.close(None).await;
                        return;
                    },
                },
                frame = ws.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        let _ = event_tx.send(TransportEvent::Text(text.to_string())).await;
                    },
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = ws.send(WsMessage::Pong(payload)).await;
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (Some(f.code.into()), f.reason.to_string()),
                            None => (None, String::new()),
                        };
                        let _ = event_tx
                            .send(TransportEvent::Closed { code, reason, was_clean: true })
                            .await;
                        stream = None;
                    },
                    Some(Ok(_)) => {}, // binary/pong/raw frames are not part of the protocol
                    Some(Err(e)) => {
                        log::warn!("[bayeux-link] WebSocket error: {}", e);
                        let class = classify_ws_error(&e);
                        let _ = event_tx
                            .send(TransportEvent::Failed(TransportFailure::new(e.to_string(), class)))
                            .await;
                        let _ = event_tx
                            .send(TransportEvent::Closed {
                                code: None,
                                reason: e.to_string(),
                                was_clean: false,
                            })
                            .await;
                        stream = None;
                    },
                    None => {
                        let _ = event_tx
                            .send(TransportEvent::Closed {
                                code: None,
                                reason: "stream ended".to_string(),
                                was_clean: false,
                            })
                            .await;
                        stream = None;
                    },
                },
            }
        } else {
            match cmd_rx.recv().await {
                Some(TransportCmd::Open) => {
                    log::debug!("[bayeux-link] Opening WebSocket connection to {}", ws_url);
                    match open_websocket(&ws_url, connect_timeout).await {
                        Ok(ws) => {
                            log::info!("[bayeux-link] WebSocket connection established");
                            stream = Some(ws);
                            let _ = event_tx.send(TransportEvent::Opened).await;
                        },
                        Err(failure) => {
                            log::warn!(
                                "[bayeux-link] WebSocket connect failed: {}",
                                failure.message
                            );
                            let _ = event_tx.send(TransportEvent::Failed(failure)).await;
                            let _ = event_tx
                                .send(TransportEvent::Closed {
                                    code: None,
                                    reason: "connect failed".to_string(),
                                    was_clean: false,
                                })
                                .await;
                        },
                    }
                },
                Some(TransportCmd::Send(_)) => {
                    // The session guards sends behind its socket-open flag;
                    // a send here means that guard was bypassed.
                    log::warn!("[bayeux-link] Dropping send while socket is closed");
                },
                Some(TransportCmd::Close) => {},
                None => return,
            }
        }
    }
}

async fn open_websocket(
    ws_url: &str,
    connect_timeout: Option<Duration>,
) -> std::result::Result<WebSocketStream, TransportFailure> {
    let connect_fut = connect_async(ws_url);
    let result = match connect_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, connect_fut).await {
            Ok(r) => r,
            Err(_) => {
                return Err(TransportFailure::new(
                    format!("connection timeout ({:?})", timeout),
                    FailureClass::ConnectionLost,
                ));
            },
        },
        None => connect_fut.await,
    };

    match result {
        Ok((stream, _response)) => Ok(stream),
        Err(WsError::Http(response)) => Err(TransportFailure::new(
            format!("WebSocket HTTP error: {}", response.status().as_u16()),
            FailureClass::Other,
        )),
        Err(e) => {
            let class = classify_ws_error(&e);
            Err(TransportFailure::new(e.to_string(), class))
        },
    }
}

// ── URL resolution ──────────────────────────────────────────────────────────

/// Derive the WebSocket endpoint from a base URL in any of the four
/// supported schemes.
pub(crate) fn resolve_ws_url(base_url: &str) -> Result<String> {
    let normalized = base_url.trim_end_matches('/');
    if normalized.starts_with("ws://") || normalized.starts_with("wss://") {
        Ok(normalized.to_string())
    } else if let Some(rest) = normalized.strip_prefix("http://") {
        Ok(format!("ws://{}", rest))
    } else if let Some(rest) = normalized.strip_prefix("https://") {
        Ok(format!("wss://{}", rest))
    } else {
        Err(BayeuxLinkError::ConfigurationError(format!(
            "unsupported URL scheme (expected ws, wss, http, or https): {}",
            base_url
        )))
    }
}

/// Derive the HTTP sibling endpoint (same host and path) used for the
/// async-handshake POST.
pub(crate) fn resolve_http_url(base_url: &str) -> Result<String> {
    let normalized = base_url.trim_end_matches('/');
    if normalized.starts_with("http://") || normalized.starts_with("https://") {
        Ok(normalized.to_string())
    } else if let Some(rest) = normalized.strip_prefix("ws://") {
        Ok(format!("http://{}", rest))
    } else if let Some(rest) = normalized.strip_prefix("wss://") {
        Ok(format!("https://{}", rest))
    } else {
        Err(BayeuxLinkError::ConfigurationError(format!(
            "unsupported URL scheme (expected ws, wss, http, or https): {}",
            base_url
        )))
    }
}

/// Extract the host and port from a resolved WebSocket URL, for
/// reachability probing.
pub(crate) fn host_and_port(ws_url: &str) -> Result<(String, u16)> {
    let (default_port, rest) = if let Some(rest) = ws_url.strip_prefix("wss://") {
        (443u16, rest)
    } else if let Some(rest) = ws_url.strip_prefix("ws://") {
        (80u16, rest)
    } else {
        return Err(BayeuxLinkError::ConfigurationError(format!(
            "not a WebSocket URL: {}",
            ws_url
        )));
    };

    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(BayeuxLinkError::ConfigurationError(format!("URL has no host: {}", ws_url)));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                BayeuxLinkError::ConfigurationError(format!("invalid port in URL: {}", ws_url))
            })?;
            Ok((host.to_string(), port))
        },
        None => Ok((authority.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_resolve_ws_url() {
        assert_eq!(resolve_ws_url("wss://example.com/bayeux").unwrap(), "wss://example.com/bayeux");
        assert_eq!(resolve_ws_url("http://localhost:8000/faye").unwrap(), "ws://localhost:8000/faye");
        assert_eq!(resolve_ws_url("https://example.com/bayeux/").unwrap(), "wss://example.com/bayeux");
        assert!(resolve_ws_url("ftp://example.com").is_err());
    }

    #[test]
    fn test_resolve_http_url() {
        assert_eq!(resolve_http_url("wss://example.com/bayeux").unwrap(), "https://example.com/bayeux");
        assert_eq!(resolve_http_url("ws://localhost:8000/faye").unwrap(), "http://localhost:8000/faye");
        assert_eq!(resolve_http_url("https://example.com/bayeux").unwrap(), "https://example.com/bayeux");
    }

    #[test]
    fn test_host_and_port() {
        assert_eq!(
            host_and_port("wss://example.com/bayeux").unwrap(),
            ("example.com".to_string(), 443)
        );
        assert_eq!(
            host_and_port("ws://localhost:8000/faye").unwrap(),
            ("localhost".to_string(), 8000)
        );
        assert_eq!(host_and_port("ws://example.com").unwrap(), ("example.com".to_string(), 80));
        assert!(host_and_port("http://example.com").is_err());
    }

    #[test]
    fn test_classify_io_errors() {
        let unreachable = IoError::new(ErrorKind::NetworkUnreachable, "net down");
        assert_eq!(classify_io_error(&unreachable), FailureClass::NetworkUnreachable);

        let host_down = IoError::new(ErrorKind::HostUnreachable, "host down");
        assert_eq!(classify_io_error(&host_down), FailureClass::NetworkUnreachable);

        let reset = IoError::new(ErrorKind::ConnectionReset, "reset");
        assert_eq!(classify_io_error(&reset), FailureClass::ConnectionLost);

        let refused = IoError::new(ErrorKind::ConnectionRefused, "refused");
        assert_eq!(classify_io_error(&refused), FailureClass::ConnectionLost);

        let timed_out = IoError::new(ErrorKind::TimedOut, "timeout");
        assert_eq!(classify_io_error(&timed_out), FailureClass::ConnectionLost);

        let other = IoError::new(ErrorKind::PermissionDenied, "denied");
        assert_eq!(classify_io_error(&other), FailureClass::Other);
    }

    #[test]
    fn test_transport_handle_pair_is_connected() {
        let (handle, mut peer) = TransportHandle::pair();
        handle.cmd_tx.try_send(TransportCmd::Open).unwrap();
        match peer.cmd_rx.try_recv().unwrap() {
            TransportCmd::Open => {},
            other => panic!("expected Open, got {:?}", other),
        }
    }
}

//! # bayeux-link
//!
//! An async client for the [Bayeux 1.0](https://docs.cometd.org/current/reference/#_bayeux)
//! publish/subscribe protocol over WebSocket, with an HTTP POST fallback
//! for the initial handshake.
//!
//! The client obtains a server-assigned identity via handshake, keeps the
//! session alive with periodic `/meta/connect` envelopes, subscribes to
//! hierarchical channel paths, and receives push-delivered messages. Server
//! "advice" drives reconnection behavior, and transport-level failures are
//! recovered automatically (with reachability gating for network outages).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use bayeux_link::{BayeuxClient, EventHandlers};
//! use serde_json::json;
//!
//! # async fn example() -> bayeux_link::Result<()> {
//! let client = BayeuxClient::builder()
//!     .url("wss://example.com/bayeux")
//!     .event_handlers(
//!         EventHandlers::new()
//!             .on_connected(|| println!("connected"))
//!             .on_failed(|err| eprintln!("error: {}", err)),
//!     )
//!     .build()?;
//!
//! client.connect().await;
//! client
//!     .subscribe("/chat/room1", |channel, data| {
//!         println!("{}: {}", channel, data);
//!     }, None)
//!     .await;
//! client.publish(json!({"text": "hello"}), "/chat/room1", None).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! A background session task owns all mutable state (lifecycle state
//! machine, subscription registry, keep-alive and reconnect timers) and
//! multiplexes between public-API commands, transport events, and timer
//! deadlines. The [`BayeuxClient`] handle is a thin command sender; hold it
//! for as long as the session should live.

mod client;
mod error;
mod event_handlers;
mod http;
mod message;
mod options;
mod protocol;
mod reachability;
mod session;
pub mod transport;

pub use client::{BayeuxClient, BayeuxClientBuilder};
pub use error::{BayeuxLinkError, Result};
pub use event_handlers::EventHandlers;
pub use message::{
    is_valid_channel, Advice, Message, MetaChannel, ReconnectAdvice, Subscription,
    BAYEUX_MINIMUM_VERSION, BAYEUX_VERSION, CONNECTION_TYPE_WEBSOCKET,
};
pub use options::{
    ConnectionOptions, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_RECONNECT_INTERVAL_MS,
    DEFAULT_RETRY_INTERVAL_MS,
};
pub use reachability::{ReachabilityProbe, TcpProbe};
pub use session::{ConnectCallback, MessageCallback};

//! Host reachability probing.
//!
//! When the transport fails with a network-unreachable class of error, the
//! session waits for the host to become reachable before reconnecting. The
//! probe is a collaborator interface so platforms with native reachability
//! notification can plug theirs in; the default polls a TCP connect.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Watches a host for reachability.
pub trait ReachabilityProbe: Send + Sync {
    /// Start watching `host:port`; send on `notify` once the host is
    /// reachable. The watch is torn down when `notify`'s receiver is
    /// dropped.
    fn watch(&self, host: String, port: u16, notify: oneshot::Sender<()>);
}

/// Default probe: retries a plain TCP connect until it succeeds.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    /// Delay between connect attempts.
    pub poll_interval: Duration,
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl TcpProbe {
    /// Create a probe with a custom poll interval.
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// The default probe as a shared trait object.
    pub(crate) fn shared() -> Arc<dyn ReachabilityProbe> {
        Arc::new(Self::default())
    }
}

impl ReachabilityProbe for TcpProbe {
    fn watch(&self, host: String, port: u16, notify: oneshot::Sender<()>) {
        let poll_interval = self.poll_interval;
        tokio::spawn(async move {
            log::debug!("[bayeux-link] Watching reachability of {}:{}", host, port);
            loop {
                if notify.is_closed() {
                    log::debug!("[bayeux-link] Reachability watch for {} torn down", host);
                    return;
                }
                match tokio::net::TcpStream::connect((host.as_str(), port)).await {
                    Ok(_) => {
                        log::info!("[bayeux-link] Host {} is reachable", host);
                        let _ = notify.send(());
                        return;
                    },
                    Err(_) => tokio::time::sleep(poll_interval).await,
                }
            }
        });
    }
}

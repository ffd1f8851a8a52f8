//! In-memory transport implementation for local runs and testing.
//!
//! Clients are created with [`LocalTransport::connect`] and talk to their
//! session over channels, without any network I/O.

use crate::network::transport::{
    INBOUND_CAPACITY, Link, OUTBOUND_CAPACITY, Transport, TransportError,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{Receiver, Sender, channel};

/// In-memory transport handing out channel-backed links.
pub struct LocalTransport {
    address: String,
    links: Mutex<Option<Sender<Link>>>,
    next_client: AtomicUsize,
}

impl LocalTransport {
    /// Creates a new LocalTransport instance with the given address.
    pub fn new(address: &str) -> Arc<LocalTransport> {
        Arc::new(LocalTransport {
            address: address.to_string(),
            links: Mutex::new(None),
            next_client: AtomicUsize::new(0),
        })
    }

    /// Opens a new link and returns the client end.
    ///
    /// # Errors
    /// Returns [`TransportError::Closed`] if the transport is not started or
    /// nobody accepts links any more.
    pub async fn connect(&self) -> Result<LocalClient, TransportError> {
        let links = self.links.lock().await.clone().ok_or(TransportError::Closed)?;

        let (client_tx, inbound) = channel(INBOUND_CAPACITY);
        let (outbound, client_rx) = channel(OUTBOUND_CAPACITY);
        let n = self.next_client.fetch_add(1, Ordering::Relaxed);
        let peer = format!("{}#{n}", self.address);

        links.send(Link::new(peer, inbound, outbound)).await?;
        Ok(LocalClient {
            tx: client_tx,
            rx: client_rx,
        })
    }
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    async fn start(self: Arc<Self>, links: Sender<Link>) -> Result<(), TransportError> {
        let mut guard = self.links.lock().await;
        if guard.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        *guard = Some(links);
        Ok(())
    }

    fn addr(&self) -> String {
        self.address.clone()
    }
}

/// Client end of an in-memory link. Dropping it disconnects the client.
pub struct LocalClient {
    tx: Sender<String>,
    rx: Receiver<String>,
}

impl LocalClient {
    pub async fn send(&self, message: impl Into<String>) -> Result<(), TransportError> {
        Ok(self.tx.send(message.into()).await?)
    }

    /// Next event line, or `None` once the session has ended.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Collects event lines until the session ends.
    pub async fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.rx.recv().await {
            lines.push(line);
        }
        lines
    }
}

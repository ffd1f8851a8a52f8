//! Core transport abstractions for client links.
//!
//! A transport accepts clients and turns each one into a [`Link`]: an
//! ordered, reliable duplex channel of whole text messages. Sessions only
//! ever see links, so they run the same over TCP and in memory.

use std::sync::Arc;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::{Receiver, Sender};

/// Capacity of the per-link inbound queue.
pub const INBOUND_CAPACITY: usize = 64;

/// Capacity of the per-link outbound queue. Senders wait when it is full,
/// so events are never dropped.
pub const OUTBOUND_CAPACITY: usize = 1024;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The other side of the link, or the transport itself, is gone.
    #[error("link closed")]
    Closed,

    /// A frame exceeded the configured maximum.
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    /// A frame was not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidText,

    /// The transport was started twice.
    #[error("transport already started")]
    AlreadyStarted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl<T> From<SendError<T>> for TransportError {
    fn from(_: SendError<T>) -> Self {
        TransportError::Closed
    }
}

/// One client's duplex message channel.
pub struct Link {
    /// Human-readable peer name for logs.
    pub peer: String,
    inbound: Receiver<String>,
    outbound: Sender<String>,
}

impl Link {
    pub fn new(peer: impl Into<String>, inbound: Receiver<String>, outbound: Sender<String>) -> Self {
        Self {
            peer: peer.into(),
            inbound,
            outbound,
        }
    }

    /// Next message from the client, or `None` once the client is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Queues a message for the client in order.
    ///
    /// # Errors
    /// Returns [`TransportError::Closed`] if the client is gone.
    pub async fn send(&self, message: String) -> Result<(), TransportError> {
        Ok(self.outbound.send(message).await?)
    }
}

/// Async transport that produces client links.
///
/// Implementors accept clients by whatever means they have and hand every new
/// [`Link`] to the sender passed to [`start`](Transport::start).
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Begins accepting clients.
    ///
    /// Returns once accepting is underway; links keep arriving on `links`
    /// until its receiver is dropped.
    ///
    /// # Errors
    /// Returns [`TransportError::AlreadyStarted`] on a second call.
    async fn start(self: Arc<Self>, links: Sender<Link>) -> Result<(), TransportError>;

    /// Returns the local address of this transport.
    fn addr(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::channel;

    #[tokio::test]
    async fn link_passes_messages_both_ways() {
        let (client_tx, inbound) = channel(4);
        let (outbound, mut client_rx) = channel(4);
        let mut link = Link::new("test", inbound, outbound);

        client_tx.send("push 1".to_string()).await.unwrap();
        assert_eq!(link.recv().await.as_deref(), Some("push 1"));

        link.send("@p 1".to_string()).await.unwrap();
        assert_eq!(client_rx.recv().await.as_deref(), Some("@p 1"));
    }

    #[tokio::test]
    async fn closed_link_reports_closed() {
        let (client_tx, inbound) = channel(4);
        let (outbound, client_rx) = channel(4);
        let mut link = Link::new("test", inbound, outbound);

        drop(client_tx);
        drop(client_rx);
        assert!(link.recv().await.is_none());
        assert!(matches!(
            link.send("@f".to_string()).await,
            Err(TransportError::Closed)
        ));
    }
}

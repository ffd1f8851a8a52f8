//! Execution server accepting links from multiple transports.
//!
//! Every link gets its own [`Session`] task. Sessions share nothing; the
//! server only keeps a registry of the active ones for logging.

use crate::config::SessionConfig;
use crate::info;
use crate::network::session::{Session, SessionReport};
use crate::network::transport::{Link, Transport, TransportError};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{Receiver, channel};
use tokio::sync::oneshot;
use tokio::task::JoinSet;

/// Links accepted but not yet picked up by the server loop.
const LINK_BACKLOG: usize = 128;

/// Configuration options for the server.
pub struct ServerOps {
    /// Transport layers to accept links from.
    pub transports: Vec<Arc<dyn Transport>>,
    /// Settings handed to every session.
    pub session: SessionConfig,
}

/// Server spawning one session per accepted link.
pub struct Server {
    options: ServerOps,
    /// Active session ids and their peers.
    sessions: Arc<DashMap<u64, String>>,
    next_id: AtomicU64,
}

impl Server {
    /// Creates a new server with the specified configuration.
    pub fn new(options: ServerOps) -> Self {
        Server {
            options,
            sessions: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Starts every transport and returns the merged stream of links.
    ///
    /// # Errors
    /// Fails if any transport fails to start.
    pub async fn start(&self) -> Result<Receiver<Link>, TransportError> {
        let (sx, rx) = channel::<Link>(LINK_BACKLOG);
        for transport in &self.options.transports {
            transport.clone().start(sx.clone()).await?;
            info!("accepting links on {}", transport.addr());
        }
        Ok(rx)
    }

    /// Runs sessions for incoming links until `shutdown` fires or every
    /// transport is gone. Sessions still running at shutdown are aborted.
    pub async fn serve(&self, mut links: Receiver<Link>, mut shutdown: oneshot::Receiver<()>) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                link = links.recv() => match link {
                    Some(link) => self.spawn_session(&mut tasks, link),
                    None => break,
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                _ = &mut shutdown => break,
            }
        }

        if !tasks.is_empty() {
            info!("aborting {} running sessions", tasks.len());
        }
        tasks.shutdown().await;
        self.sessions.clear();
        info!("Server shut down");
    }

    fn spawn_session(&self, tasks: &mut JoinSet<SessionReport>, link: Link) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sessions = self.sessions.clone();
        sessions.insert(id, link.peer.clone());
        info!(
            "session {id} opened for {} ({} active)",
            link.peer,
            sessions.len()
        );

        let session = Session::new(link, self.options.session.clone());
        tasks.spawn(async move {
            let report = session.run().await;
            sessions.remove(&id);
            report
        });
    }

    /// Number of sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

// Server end of the real-time channel: topic fan-out to WebSocket sessions

mod session;

pub use session::Session;

use crate::subscription::protocol::DataFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Fans labelled publications out to every connected session
pub struct Hub {
    publication_tx: broadcast::Sender<Arc<DataFrame>>,
    connections: AtomicU64,
}

impl Hub {
    /// `capacity` publications are buffered per session before it lags
    pub fn new(capacity: usize) -> Self {
        let (publication_tx, _) = broadcast::channel(capacity);
        Self {
            publication_tx,
            connections: AtomicU64::new(0),
        }
    }

    /// Publish a frame to all sessions. Returns how many sessions were
    /// connected (each one filters by its own topics).
    pub fn publish(&self, frame: DataFrame) -> usize {
        debug!(labels = ?frame.labels, "Publishing frame");
        // No receivers is fine
        self.publication_tx.send(Arc::new(frame)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DataFrame>> {
        self.publication_tx.subscribe()
    }

    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Count a connection until the returned guard drops
    pub(crate) fn track_connection(self: &Arc<Self>) -> ConnectionGuard {
        self.connections.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            hub: Arc::clone(self),
        }
    }
}

pub(crate) struct ConnectionGuard {
    hub: Arc<Hub>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.hub.connections.fetch_sub(1, Ordering::Relaxed);
    }
}

//! Connection registry mapping connection ids to outbound channels.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::info;

use crate::review::ReviewResult;

/// Literal text frame closing every review stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Errors that can occur when delivering frames to a connection.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Connection '{0}' is closed")]
    ConnectionClosed(String),
}

/// A frame queued for delivery to one client.
///
/// The stream protocol has three frame shapes and no envelope: the
/// greeting object, per-file result objects, and the bare terminator
/// string.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// Greeting sent once after connect, carrying the connection id.
    Hello { id: String },
    /// One per-file review result.
    Review(ReviewResult),
    /// End of the result stream for one job.
    Done,
}

impl OutboundFrame {
    /// Renders the frame as the text payload sent over the socket.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        match self {
            OutboundFrame::Hello { id } => serde_json::to_string(&serde_json::json!({ "id": id })),
            OutboundFrame::Review(result) => serde_json::to_string(result),
            OutboundFrame::Done => Ok(DONE_SENTINEL.to_string()),
        }
    }
}

/// Sending half of one client connection.
///
/// Cloning is cheap; all clones feed the same writer task. Sends fail
/// once the client disconnects and its writer task drops the receiver.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Connection id, as greeted to the client.
    pub id: String,
    /// When the connection was registered.
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<OutboundFrame>,
}

impl ConnectionHandle {
    pub fn new(id: impl Into<String>, sender: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            id: id.into(),
            connected_at: Utc::now(),
            sender,
        }
    }

    /// Queues a frame for delivery to this connection.
    pub async fn send(&self, frame: OutboundFrame) -> Result<(), DeliveryError> {
        self.sender
            .send(frame)
            .await
            .map_err(|_| DeliveryError::ConnectionClosed(self.id.clone()))
    }
}

/// Registry of live connections, shared between gateway and workers.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection under its id.
    pub async fn register(&self, handle: ConnectionHandle) {
        let mut connections = self.connections.write().await;
        let id = handle.id.clone();
        connections.insert(id.clone(), handle);
        info!(
            connection_id = %id,
            active = connections.len(),
            "Connection registered"
        );
    }

    /// Removes a connection; sends to its handle fail afterwards.
    pub async fn unregister(&self, id: &str) {
        let mut connections = self.connections.write().await;
        connections.remove(id);
        info!(
            connection_id = %id,
            active = connections.len(),
            "Connection unregistered"
        );
    }

    /// Looks up the handle for a connection id.
    pub async fn get(&self, id: &str) -> Option<ConnectionHandle> {
        self.connections.read().await.get(id).cloned()
    }

    /// Number of live connections.
    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }
}

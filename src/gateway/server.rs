//! Axum WebSocket server feeding the connection registry.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, SplitStream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::registry::{ConnectionHandle, ConnectionRegistry, OutboundFrame};

/// Default address the gateway listens on.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8081";

/// Frames buffered per connection before senders wait.
const OUTBOUND_BUFFER: usize = 100;

/// Builds the gateway router exposing the `/ws` endpoint.
pub fn router(registry: Arc<ConnectionRegistry>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(registry)
}

/// Binds the gateway and serves it on a background task.
///
/// Returns the bound address, which matters when `addr` requests an
/// ephemeral port.
pub async fn bind(
    addr: &str,
    registry: Arc<ConnectionRegistry>,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let app = router(registry);

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "WebSocket gateway terminated");
        }
    });

    Ok((local_addr, task))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(registry): State<Arc<ConnectionRegistry>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

/// Owns one client connection from upgrade to disconnect.
///
/// The socket is split so a dedicated task drains the outbound channel
/// while this task watches the inbound side for the close. Frames are
/// not read back from clients; jobs arrive through the queue.
async fn handle_socket(socket: WebSocket, registry: Arc<ConnectionRegistry>) {
    let connection_id = Uuid::new_v4().to_string();
    let (sink, stream) = socket.split();
    let (tx, rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_BUFFER);

    registry
        .register(ConnectionHandle::new(connection_id.clone(), tx.clone()))
        .await;
    info!(connection_id = %connection_id, "Client connected");

    let writer = tokio::spawn(write_outbound(sink, rx));

    // The client needs its id before it can enqueue jobs that route
    // back to this connection.
    if tx
        .send(OutboundFrame::Hello {
            id: connection_id.clone(),
        })
        .await
        .is_err()
    {
        error!(connection_id = %connection_id, "Failed to queue greeting frame");
    }

    read_until_closed(stream, &connection_id).await;

    registry.unregister(&connection_id).await;
    writer.abort();
    info!(connection_id = %connection_id, "Client disconnected");
}

/// Drains the outbound channel into the socket until either side ends.
async fn write_outbound(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<OutboundFrame>) {
    while let Some(frame) = rx.recv().await {
        let text = match frame.to_text() {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to encode outbound frame");
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text.into())).await {
            debug!(error = %e, "Socket write failed");
            break;
        }
    }
}

async fn read_until_closed(mut stream: SplitStream<WebSocket>, connection_id: &str) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Close(_)) => {
                debug!(connection_id = %connection_id, "Close frame received");
                break;
            }
            Ok(Message::Text(text)) => {
                debug!(
                    connection_id = %connection_id,
                    len = text.len(),
                    "Ignoring inbound text frame"
                );
            }
            Ok(_) => {}
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "Socket read failed");
                break;
            }
        }
    }
}

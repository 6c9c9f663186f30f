use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::ClientError;

/// What the transport reports back to the controller.
pub enum TransportEvent {
    Opened(Connection),
    Failed(ClientError),
    Message(ServerMessage),
    Closed,
}

/// Events are tagged with the attempt number so late ones from an abandoned
/// connection can be told apart
pub type TransportSender = mpsc::UnboundedSender<(u64, TransportEvent)>;

/// Live control connection. Dropping it closes the socket.
pub struct Connection {
    sender: mpsc::UnboundedSender<ClientMessage>,
    reader: JoinHandle<()>,
}

impl Connection {
    pub fn send(&self, message: ClientMessage) -> bool {
        self.sender.send(message).is_ok()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Open a connection in the background; the outcome arrives on `events`.
pub fn open(url: String, epoch: u64, events: TransportSender) {
    tokio::spawn(async move {
        match connect(&url, epoch, events.clone()).await {
            Ok(connection) => {
                let _ = events.send((epoch, TransportEvent::Opened(connection)));
            }
            Err(e) => {
                let _ = events.send((epoch, TransportEvent::Failed(e)));
            }
        }
    });
}

async fn connect(url: &str, epoch: u64, events: TransportSender) -> Result<Connection, ClientError> {
    let (ws_stream, _) = connect_async(url).await?;
    tracing::info!("Control connection to {} established", url);

    let (mut write, mut read) = ws_stream.split();

    // Create channel for sending messages
    let (tx, mut rx) = mpsc::unbounded_channel::<ClientMessage>();

    // Spawn task to handle outgoing messages
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {}", e);
                    continue;
                }
            };

            if write.send(Message::Text(json.into())).await.is_err() {
                tracing::error!("Failed to send WebSocket message");
                break;
            }
        }

        // Sender dropped: queued messages are out, say goodbye
        let _ = write.send(Message::Close(None)).await;
    });

    // Spawn task to handle incoming messages
    let reader = tokio::spawn(async move {
        while let Some(result) = read.next().await {
            match result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(msg) => {
                        if events.send((epoch, TransportEvent::Message(msg))).is_err() {
                            return;
                        }
                    }
                    Err(e) => tracing::debug!("Dropping malformed relay message: {}", e),
                },
                Ok(Message::Close(_)) => {
                    tracing::info!("WebSocket closed by relay");
                    break;
                }
                Err(e) => {
                    tracing::warn!("WebSocket error: {}", e);
                    break;
                }
                // Pings are answered by tungstenite
                _ => {}
            }
        }

        let _ = events.send((epoch, TransportEvent::Closed));
    });

    Ok(Connection { sender: tx, reader })
}

//! Client side of the WhatsApp Web bridge.
//!
//! The WhatsApp Web session itself lives in a sidecar process (see
//! [`super::sidecar`]). The bot talks to it over a local WebSocket carrying
//! JSON frames tagged by `type`: the bridge pushes lifecycle and message
//! events, and answers the bot's requests by echoing their `request_id`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{BridgeError, ChatId, ChatSession, ChatSummary, IncomingMessage, SessionEvent};

/// Requests sent to the bridge
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeRequest<'a> {
    ListChats {
        request_id: &'a str,
    },
    GetChat {
        request_id: &'a str,
        chat_id: &'a ChatId,
    },
    Reply {
        request_id: &'a str,
        chat_id: &'a ChatId,
        message_id: &'a str,
        text: &'a str,
    },
}

/// Frames received from the bridge
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeFrame {
    Qr {
        code: String,
    },
    Ready,
    AuthFailure {
        #[serde(default)]
        reason: String,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    Message {
        message: IncomingMessage,
    },
    Chats {
        request_id: String,
        chats: Vec<ChatSummary>,
    },
    Chat {
        request_id: String,
        chat: ChatSummary,
    },
    Ack {
        request_id: String,
    },
    Error {
        #[serde(default)]
        request_id: Option<String>,
        message: String,
    },
}

#[derive(Debug)]
enum BridgeResponse {
    Chats(Vec<ChatSummary>),
    Chat(ChatSummary),
    Ack,
    Error(String),
}

impl BridgeResponse {
    fn kind(&self) -> &'static str {
        match self {
            BridgeResponse::Chats(_) => "chats",
            BridgeResponse::Chat(_) => "chat",
            BridgeResponse::Ack => "ack",
            BridgeResponse::Error(_) => "error",
        }
    }
}

/// Requests awaiting a response, by `request_id`. `None` once the connection
/// is gone, so no request can be registered after its tasks have exited.
type PendingRequests = Arc<Mutex<Option<HashMap<String, oneshot::Sender<BridgeResponse>>>>>;

fn open_pending() -> PendingRequests {
    Arc::new(Mutex::new(Some(HashMap::new())))
}

/// Mark the connection closed. Dropping the senders fails every in-flight
/// request with `Closed`.
async fn close_pending(pending: &PendingRequests) {
    pending.lock().await.take();
}

/// Connection to a running WhatsApp Web bridge
pub struct WhatsAppBridge {
    write_tx: mpsc::UnboundedSender<String>,
    pending: PendingRequests,
}

impl WhatsAppBridge {
    /// Connect to the bridge at `url`.
    ///
    /// Returns the bridge handle and the stream of session events. The stream
    /// ends when the bridge closes the socket.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        let (ws_stream, _) = connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to WhatsApp bridge at {}", url))?;
        info!("Connected to WhatsApp bridge at {}", url);

        let (mut ws_sink, mut ws_reader) = ws_stream.split();
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pending = open_pending();

        let writer_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(frame) = write_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(frame.into())).await {
                    warn!("Failed to write to WhatsApp bridge: {}", e);
                    break;
                }
            }
            close_pending(&writer_pending).await;
        });

        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        route_frame(&text, &reader_pending, &event_tx).await;
                    }
                    Ok(Message::Close(_)) => {
                        debug!("WhatsApp bridge closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WhatsApp bridge connection error: {}", e);
                        break;
                    }
                }
            }
            close_pending(&reader_pending).await;
        });

        Ok((Self { write_tx, pending }, event_rx))
    }

    /// Connect to a bridge that may still be starting, trying once per second.
    pub async fn connect_with_retry(
        url: &str,
        attempts: u32,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        let mut attempt = 1;
        loop {
            match Self::connect(url).await {
                Ok(connection) => return Ok(connection),
                Err(e) if attempt < attempts => {
                    debug!(
                        "WhatsApp bridge not reachable yet (attempt {}/{}): {:#}",
                        attempt, attempts, e
                    );
                    attempt += 1;
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request(
        &self,
        name: &'static str,
        request_id: &str,
        frame: &BridgeRequest<'_>,
    ) -> Result<BridgeResponse, BridgeError> {
        let json = serde_json::to_string(frame)?;
        let (tx, rx) = oneshot::channel();
        match self.pending.lock().await.as_mut() {
            Some(pending) => pending.insert(request_id.to_string(), tx),
            None => return Err(BridgeError::Closed),
        };

        if self.write_tx.send(json).is_err() {
            if let Some(pending) = self.pending.lock().await.as_mut() {
                pending.remove(request_id);
            }
            return Err(BridgeError::Closed);
        }

        match rx.await.map_err(|_| BridgeError::Closed)? {
            BridgeResponse::Error(message) => Err(BridgeError::Rejected {
                request: name,
                message,
            }),
            response => Ok(response),
        }
    }
}

#[async_trait]
impl ChatSession for WhatsAppBridge {
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, BridgeError> {
        let request_id = Uuid::new_v4().to_string();
        let frame = BridgeRequest::ListChats {
            request_id: &request_id,
        };
        match self.request("list_chats", &request_id, &frame).await? {
            BridgeResponse::Chats(chats) => Ok(chats),
            other => Err(BridgeError::UnexpectedResponse {
                request: "list_chats",
                got: other.kind().to_string(),
            }),
        }
    }

    async fn get_chat(&self, chat_id: &ChatId) -> Result<ChatSummary, BridgeError> {
        let request_id = Uuid::new_v4().to_string();
        let frame = BridgeRequest::GetChat {
            request_id: &request_id,
            chat_id,
        };
        match self.request("get_chat", &request_id, &frame).await? {
            BridgeResponse::Chat(chat) => Ok(chat),
            other => Err(BridgeError::UnexpectedResponse {
                request: "get_chat",
                got: other.kind().to_string(),
            }),
        }
    }

    async fn reply(&self, message: &IncomingMessage, text: &str) -> Result<(), BridgeError> {
        let request_id = Uuid::new_v4().to_string();
        let frame = BridgeRequest::Reply {
            request_id: &request_id,
            chat_id: &message.chat_id,
            message_id: &message.id,
            text,
        };
        match self.request("reply", &request_id, &frame).await? {
            BridgeResponse::Ack => Ok(()),
            other => Err(BridgeError::UnexpectedResponse {
                request: "reply",
                got: other.kind().to_string(),
            }),
        }
    }
}

/// Dispatch one frame: events go to the event stream, responses to the
/// request waiting on their `request_id`.
async fn route_frame(
    text: &str,
    pending: &PendingRequests,
    events: &mpsc::UnboundedSender<SessionEvent>,
) {
    let frame: BridgeFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Ignoring unreadable bridge frame ({}): {}", e, text);
            return;
        }
    };

    let (request_id, response) = match frame {
        BridgeFrame::Qr { code } => return emit(events, SessionEvent::Qr(code)),
        BridgeFrame::Ready => return emit(events, SessionEvent::Ready),
        BridgeFrame::AuthFailure { reason } => {
            return emit(events, SessionEvent::AuthFailure(reason))
        }
        BridgeFrame::Disconnected { reason } => {
            return emit(events, SessionEvent::Disconnected(reason))
        }
        BridgeFrame::Message { message } => return emit(events, SessionEvent::Message(message)),
        BridgeFrame::Chats { request_id, chats } => (request_id, BridgeResponse::Chats(chats)),
        BridgeFrame::Chat { request_id, chat } => (request_id, BridgeResponse::Chat(chat)),
        BridgeFrame::Ack { request_id } => (request_id, BridgeResponse::Ack),
        BridgeFrame::Error {
            request_id: Some(request_id),
            message,
        } => (request_id, BridgeResponse::Error(message)),
        BridgeFrame::Error {
            request_id: None,
            message,
        } => {
            warn!("WhatsApp bridge error: {}", message);
            return;
        }
    };

    let waiter = pending
        .lock()
        .await
        .as_mut()
        .and_then(|pending| pending.remove(&request_id));
    match waiter {
        Some(tx) => {
            let _ = tx.send(response);
        }
        None => debug!("Bridge response for unknown request {}", request_id),
    }
}

fn emit(events: &mpsc::UnboundedSender<SessionEvent>, event: SessionEvent) {
    if events.send(event).is_err() {
        debug!("Session event dropped, no listener");
    }
}

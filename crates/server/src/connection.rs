//! Per-connection read/write pumps and the outbound [`Sender`] handle.

use std::net::SocketAddr;
use std::sync::Arc;

use filedepot_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT};
use filedepot_protocol::envelope::Message;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use filedepot_store::Depot;

use crate::SEND_BUFFER_SIZE;
use crate::service::Service;

/// Handle for sending messages to the connected client.
///
/// Cloneable and cheap; wraps an `mpsc::Sender`. Sends apply
/// backpressure: a slow client slows its own transfers down instead of
/// ballooning server memory.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Sends a protocol [`Message`] as JSON text.
    pub async fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        let json = serde_json::to_string(&msg).map_err(|_| SendError)?;
        self.tx
            .send(WsMessage::Text(json.into()))
            .await
            .map_err(|_| SendError)
    }

    /// Sends an error response for the given request message.
    pub async fn send_error(
        &self,
        req: &Message,
        code: i32,
        message: impl Into<String>,
    ) -> Result<(), SendError> {
        self.send_msg(req.reject(code, message)).await
    }

    /// Sends a raw binary frame.
    pub async fn send_binary(&self, data: Vec<u8>) -> Result<(), SendError> {
        self.tx
            .send(WsMessage::Binary(data.into()))
            .await
            .map_err(|_| SendError)
    }

    /// Returns `true` if the connection is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    fn try_pong(&self, data: tokio_tungstenite::tungstenite::Bytes) {
        let _ = self.tx.try_send(WsMessage::Pong(data));
    }
}

/// Error returned when the connection is closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: connection closed")]
pub struct SendError;

/// Serves one client connection until it closes or the server shuts down.
pub(crate) async fn serve<S>(
    ws_stream: S,
    peer: SocketAddr,
    depot: Arc<Depot>,
    cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + Unpin
        + 'static,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let sender = Sender { tx };
    let (ws_sink, ws_read) = ws_stream.split();

    let writer = tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    let service = Arc::new(Service::new(depot, sender.clone(), cancel.clone()));
    read_pump(ws_read, sender, &service, &cancel).await;

    // Read side finished: cancel in-flight transfers and the write pump.
    cancel.cancel();
    let _ = writer.await;
    tracing::info!(%peer, "client disconnected");
}

/// Write pump: drains the send channel and emits periodic pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break, // Channel closed.
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;

    // A dead sink strands every in-flight transfer on this connection;
    // cancelling here reclaims their permits even if the read pump is
    // still parked.
    cancel.cancel();
}

/// Read pump: reads WS frames and dispatches to the service.
async fn read_pump<S>(
    mut stream: S,
    sender: Sender,
    service: &Arc<Service>,
    cancel: &CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
{
    let mut pong_deadline = tokio::time::interval(WS_PONG_WAIT);
    pong_deadline.reset();
    let mut alive = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = pong_deadline.tick() => {
                if !alive {
                    tracing::warn!("read deadline expired, closing connection");
                    break;
                }
                alive = false;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(ws_msg)) => {
                        // Any traffic proves the peer is alive.
                        alive = true;
                        match ws_msg {
                            WsMessage::Text(text) => {
                                if text.len() > WS_MAX_MESSAGE_SIZE {
                                    tracing::error!("message exceeds max size ({} > {WS_MAX_MESSAGE_SIZE})", text.len());
                                    continue;
                                }
                                dispatch_text(service, &text).await;
                            }
                            WsMessage::Binary(data) => {
                                if data.len() > WS_MAX_MESSAGE_SIZE {
                                    tracing::error!("binary frame exceeds max size ({} > {WS_MAX_MESSAGE_SIZE})", data.len());
                                    continue;
                                }
                                service.dispatch_binary(&data).await;
                            }
                            WsMessage::Ping(data) => sender.try_pong(data),
                            WsMessage::Pong(_) => {
                                pong_deadline.reset();
                            }
                            WsMessage::Close(_) => {
                                tracing::debug!("received close frame");
                                break;
                            }
                            WsMessage::Frame(_) => {} // Raw frames ignored.
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!("read pump error: {e}");
                        break;
                    }
                    None => break, // Stream ended.
                }
            }
        }
    }
}

async fn dispatch_text(service: &Arc<Service>, text: &str) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("invalid message JSON: {e}");
            return;
        }
    };
    service.dispatch_text(msg).await;
}

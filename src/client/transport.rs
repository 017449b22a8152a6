//! Transport seam between the connection manager and the network.
//!
//! A [`Connector`] opens a [`Link`]: a pair of channels carrying typed
//! messages in both directions. The real implementation, [`WsConnector`],
//! runs a reader and a writer task over `tokio-tungstenite`; tests plug in
//! their own connector and play the server through the channel ends.

use crate::error::{AppError, AppResult};
use crate::protocol::events::{ClientEvent, ServerEvent};
use crate::protocol::wire::{self, AudioFrame, BinaryMessage};
use crate::room::transmission::TransmissionMeta;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

const LINK_BUFFER: usize = 64;

/// Anything the client sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Event(ClientEvent),
    Audio(AudioFrame),
    Upload {
        meta: TransmissionMeta,
        payload: Vec<u8>,
    },
}

/// Anything the link reports.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Event(ServerEvent),
    Audio(AudioFrame),
    /// The server closed the socket on purpose
    ServerClosed,
    /// The socket failed
    Lost(String),
}

/// One open transport session. Dropping it closes the session.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<LinkEvent>,
}

impl Link {
    /// Create a link and the far ends of its channels.
    pub fn pair() -> (Self, mpsc::Receiver<ClientMessage>, mpsc::Sender<LinkEvent>) {
        let (out_tx, out_rx) = mpsc::channel(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(LINK_BUFFER);
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
            },
            out_rx,
            in_tx,
        )
    }
}

/// Opens transport sessions.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = AppResult<Link>> + Send;
}

/// WebSocket connector for the relay's `/ws` endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> impl Future<Output = AppResult<Link>> + Send {
        let url = self.url.clone();
        async move {
            let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| AppError::ConnectionFailed(format!("{}: {}", url, e)))?;
            debug!(url = %url, "WebSocket connected");

            let (mut sink, mut stream) = socket.split();
            let (link, mut outbound, inbound) = Link::pair();

            tokio::spawn(async move {
                while let Some(message) = outbound.recv().await {
                    let frame = match encode(message) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "Dropping unencodable message");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(frame).await {
                        debug!(error = %e, "WebSocket write failed");
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            tokio::spawn(async move {
                let lost = loop {
                    let event = match stream.next().await {
                        Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => LinkEvent::Event(event),
                            Err(e) => {
                                warn!(error = %e, "Ignoring malformed server event");
                                continue;
                            }
                        },
                        Some(Ok(Message::Binary(data))) => match wire::decode(&data) {
                            Ok(BinaryMessage::Audio(frame)) => LinkEvent::Audio(frame),
                            Ok(BinaryMessage::Transmission { .. }) => continue,
                            Err(e) => {
                                debug!(error = %e, "Ignoring malformed binary frame");
                                continue;
                            }
                        },
                        Some(Ok(Message::Close(_))) => break LinkEvent::ServerClosed,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => break LinkEvent::Lost(e.to_string()),
                        None => break LinkEvent::Lost("stream ended".to_string()),
                    };
                    if inbound.send(event).await.is_err() {
                        return;
                    }
                };
                let _ = inbound.send(lost).await;
            });

            Ok(link)
        }
    }
}

fn encode(message: ClientMessage) -> AppResult<Message> {
    Ok(match message {
        ClientMessage::Event(event) => Message::Text(serde_json::to_string(&event)?),
        ClientMessage::Audio(frame) => Message::Binary(frame.encode()?),
        ClientMessage::Upload { meta, payload } => Message::Binary(wire::encode_transmission(&meta, &payload)?),
    })
}

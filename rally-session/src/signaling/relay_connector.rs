use crate::error::SessionError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rally_core::PeerId;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Raw text pipe to the relay. Dropping `outbound` closes the connection;
/// `inbound` ends when the relay goes away.
pub struct RelayChannel {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, peer: &PeerId) -> Result<RelayChannel, SessionError>;
}

/// Connects to `<base>/ws/<peer>` over WebSocket.
#[derive(Debug, Clone)]
pub struct WsRelayConnector {
    base_url: String,
}

impl WsRelayConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl RelayConnector for WsRelayConnector {
    async fn connect(&self, peer: &PeerId) -> Result<RelayChannel, SessionError> {
        let url = format!("{}/ws/{}", self.base_url.trim_end_matches('/'), peer);
        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SessionError::Relay(format!("cannot reach {url}: {e}")))?;
        debug!("WebSocket to {} established", url);

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text.to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Relay socket error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(RelayChannel {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

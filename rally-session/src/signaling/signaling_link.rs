use crate::error::SessionError;
use crate::event::{Epoch, EventSender, SessionEvent};
use crate::signaling::{RelayChannel, RelayConnector};
use rally_core::{PeerId, SignalMessage, decode_signal, encode_signal};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Anything negotiation can hand an outgoing relay frame to.
pub trait SignalSink: Send + Sync {
    fn send_signal(&self, message: SignalMessage) -> Result<(), SessionError>;
}

/// One live connection to the relay under a single peer identity.
///
/// Inbound frames are decoded and forwarded to the session loop tagged with
/// this link's epoch. Frames that fail to decode are logged and dropped. When
/// the relay side ends, exactly one `RelayClosed` is emitted.
pub struct SignalingLink {
    epoch: Epoch,
    local: PeerId,
    outbound: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
    keepalive: JoinHandle<()>,
}

impl SignalingLink {
    /// Connects, starts the reader and keepalive, then sends `request`
    /// (a create or join) as the first frame.
    pub(crate) async fn connect(
        connector: &dyn RelayConnector,
        epoch: Epoch,
        local: PeerId,
        request: SignalMessage,
        keepalive: Duration,
        events: EventSender,
    ) -> Result<Self, SessionError> {
        let RelayChannel { outbound, inbound } = connector.connect(&local).await?;

        let reader = tokio::spawn(read_frames(epoch, inbound, events));
        let keepalive = tokio::spawn(send_keepalive(outbound.clone(), keepalive));

        let link = Self {
            epoch,
            local,
            outbound,
            reader,
            keepalive,
        };
        link.send_signal(request)?;
        info!("Relay link {} opened as {}", link.epoch, link.local);
        Ok(link)
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local
    }

    /// Stops the keepalive and reader and closes the connection.
    pub fn close(self) {
        info!("Relay link {} closed", self.epoch);
    }
}

impl SignalSink for SignalingLink {
    fn send_signal(&self, message: SignalMessage) -> Result<(), SessionError> {
        let text = encode_signal(&message)?;
        self.outbound
            .send(text)
            .map_err(|_| SessionError::LinkClosed)
    }
}

impl Drop for SignalingLink {
    fn drop(&mut self) {
        self.reader.abort();
        self.keepalive.abort();
    }
}

async fn read_frames(
    epoch: Epoch,
    mut inbound: mpsc::UnboundedReceiver<String>,
    events: EventSender,
) {
    while let Some(text) = inbound.recv().await {
        match decode_signal(&text) {
            Ok(message) => {
                debug!("Relay {} -> {:?}", epoch, message);
                if events.send(SessionEvent::Relay { link: epoch, message }).is_err() {
                    return;
                }
            }
            Err(e) => warn!("Dropping invalid relay frame: {}", e),
        }
    }
    let _ = events.send(SessionEvent::RelayClosed { link: epoch });
}

async fn send_keepalive(outbound: mpsc::UnboundedSender<String>, period: Duration) {
    let ping = match encode_signal(&SignalMessage::Ping) {
        Ok(ping) => ping,
        Err(e) => {
            warn!("Cannot encode keepalive: {}", e);
            return;
        }
    };
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if outbound.send(ping.clone()).is_err() {
            break;
        }
    }
}

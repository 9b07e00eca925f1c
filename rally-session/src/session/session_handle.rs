use crate::error::SessionError;
use crate::session::session_command::SessionCommand;
use crate::session::{SessionMode, SessionSnapshot};
use rally_core::{GameMessage, RoomCode};
use tokio::sync::{mpsc, oneshot, watch};

/// Cloneable front door to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<SessionCommand>,
        snapshots: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        Self {
            commands,
            snapshots,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Creates a room under a fresh code and returns it once the relay has
    /// accepted it.
    pub async fn host(&self) -> Result<RoomCode, SessionError> {
        self.request(|reply| SessionCommand::Host { reply }).await?
    }

    pub async fn join(&self, code: &str) -> Result<(), SessionError> {
        let room = RoomCode::parse(code)?;
        self.request(|reply| SessionCommand::Join { room, reply })
            .await?
    }

    /// Re-enters `code` with the stored host credential. Resolves to
    /// [`SessionMode::Client`] when the relay no longer recognises it.
    pub async fn reconnect_host(&self, code: &str) -> Result<SessionMode, SessionError> {
        let room = RoomCode::parse(code)?;
        self.request(|reply| SessionCommand::ReconnectHost { room, reply })
            .await?
    }

    pub async fn reconnect_client(&self, code: &str) -> Result<(), SessionError> {
        let room = RoomCode::parse(code)?;
        self.request(|reply| SessionCommand::ReconnectClient { room, reply })
            .await?
    }

    /// Sends over the data channel. Discrete messages go out immediately;
    /// continuous ones (`state`, `driver`, `nav`) ride the next send tick,
    /// newest wins. Fails with [`SessionError::NotConnected`] when no channel
    /// is open; nothing is kept for later.
    pub async fn send(&self, message: GameMessage) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Send { message, reply })
            .await?
    }

    pub async fn leave(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Leave { reply }).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Waits until the published snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot, SessionError> {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(predicate)
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        Ok(snapshot.clone())
    }
}

use crate::error::SessionError;
use crate::session::SessionMode;
use rally_core::{GameMessage, RoomCode};
use tokio::sync::oneshot;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Requests from [`SessionHandle`](crate::session::SessionHandle) to the
/// session loop.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Host { reply: Reply<RoomCode> },
    Join { room: RoomCode, reply: Reply<()> },
    ReconnectHost { room: RoomCode, reply: Reply<SessionMode> },
    ReconnectClient { room: RoomCode, reply: Reply<()> },
    Send { message: GameMessage, reply: Reply<()> },
    Leave { reply: oneshot::Sender<()> },
}

mod game_bridge;
mod session_command;
mod session_controller;
mod session_handle;
mod session_status;

pub use game_bridge::{GameBridge, SessionDescriptor};
pub use session_controller::{SessionController, SessionServices};
pub use session_handle::SessionHandle;
pub use session_status::{SessionMode, SessionSnapshot, SessionStatus};

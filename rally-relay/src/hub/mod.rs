mod relay_hub;
mod relay_room;

pub use relay_hub::*;
pub use relay_room::ROOM_CAPACITY;

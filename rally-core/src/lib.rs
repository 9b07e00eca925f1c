//! Shared data model and wire codec for rally peer sessions.

pub mod codec;
pub mod model;

pub use codec::*;
pub use model::*;

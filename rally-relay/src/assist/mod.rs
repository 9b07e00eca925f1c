mod health;
mod ice_endpoint;

pub use health::*;
pub use ice_endpoint::*;

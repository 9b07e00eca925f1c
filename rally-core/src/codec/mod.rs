mod data;
mod error;
mod signal;

pub use data::{GameMessage, decode_data, encode_data};
pub use error::CodecError;
pub use signal::{RelayErrorCode, SignalMessage, decode_signal, encode_signal};

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Decodes a `type`-tagged JSON object, classifying every failure instead of
/// panicking.
fn decode_tagged<T: DeserializeOwned>(raw: &str, kinds: &[&str]) -> Result<T, CodecError> {
    let value: Value = serde_json::from_str(raw).map_err(CodecError::Malformed)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingType)?
        .to_owned();
    if !kinds.contains(&kind.as_str()) {
        return Err(CodecError::UnknownType(kind));
    }
    serde_json::from_value(value).map_err(|source| CodecError::InvalidFields { kind, source })
}

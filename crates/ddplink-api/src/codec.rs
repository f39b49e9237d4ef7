//! Frame codec boundary.
//!
//! Converts between JSON values and the text frames carried by a
//! [`Transport`](crate::Transport). Servers that speak an extended JSON
//! dialect (dates, binary) plug in their own implementation.

use serde_json::Value;

use crate::error::Error;

pub trait Codec: Send + Sync + 'static {
    fn encode(&self, value: &Value) -> Result<String, Error>;
    fn decode(&self, text: &str) -> Result<Value, Error>;
}

/// Plain JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<String, Error> {
        Ok(serde_json::to_string(value)?)
    }

    fn decode(&self, text: &str) -> Result<Value, Error> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_codec_preserves_field_order() {
        let text = JsonCodec
            .encode(&json!({ "msg": "sub", "id": "1", "name": "items" }))
            .unwrap();
        assert_eq!(text, r#"{"msg":"sub","id":"1","name":"items"}"#);
    }

    #[test]
    fn json_codec_rejects_garbage() {
        let err = JsonCodec.decode("{not json").unwrap_err();
        assert!(matches!(err, Error::Codec { .. }));
    }
}

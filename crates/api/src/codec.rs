// crates/api/src/codec.rs
//
// JSON text codec for websocket frames. One frame carries one message.

use crate::message::{ClientMessage, ServerMessage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode message: {0}")]
    Decode(#[from] serde_json::Error),
}

pub fn encode(msg: &ClientMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(|source| CodecError::Encode {
        kind: msg.kind(),
        source,
    })
}

pub fn decode(text: &str) -> Result<ServerMessage, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Server-side counterpart of [`encode`], used by fake servers.
pub fn encode_server(msg: &ServerMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(|source| CodecError::Encode {
        kind: msg.kind(),
        source,
    })
}

/// Server-side counterpart of [`decode`], used by fake servers.
pub fn decode_client(text: &str) -> Result<ClientMessage, CodecError> {
    Ok(serde_json::from_str(text)?)
}

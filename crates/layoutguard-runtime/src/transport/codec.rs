//! Decode-once codec for the relay socket.
//!
//! - Text frames => `SyncMessage`
//! - Binary frames are rejected; the sync protocol is text only
//! - Ping/Pong/Close are surfaced for lifecycle management

use axum::extract::ws::Message;
use layoutguard_core::{
    error::{ClientCode, LayoutError, Result},
    protocol::sync::SyncMessage,
};

#[derive(Debug)]
pub enum Inbound {
    Sync(SyncMessage),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

pub fn decode(msg: Message) -> Result<Inbound> {
    match msg {
        Message::Text(s) => Ok(Inbound::Sync(SyncMessage::decode(&s)?)),
        Message::Binary(_) => Err(LayoutError::BadRequest(
            "binary frames are not supported".into(),
        )),
        Message::Ping(v) => Ok(Inbound::Ping(v)),
        Message::Pong(v) => Ok(Inbound::Pong(v)),
        Message::Close(_) => Ok(Inbound::Close),
    }
}

pub fn encode(msg: &SyncMessage) -> Result<Message> {
    Ok(Message::Text(msg.encode()?))
}

/// Error frame built without going through fallible serialization paths
/// twice: if encoding fails the client still gets a fixed payload.
pub fn error_frame(code: &str, msg: &str) -> Message {
    let err = SyncMessage::Error {
        code: code.to_string(),
        msg: msg.to_string(),
    };
    match err.encode() {
        Ok(s) => Message::Text(s),
        Err(_) => Message::Text(format!(
            r#"{{"type":"error","code":"{}","msg":"internal"}}"#,
            ClientCode::Internal.as_str()
        )),
    }
}

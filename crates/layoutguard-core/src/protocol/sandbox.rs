//! Sandbox channel messages (host <-> isolated context).
//!
//! Wire shape: a JSON object with a `type` tag and the payload fields inline,
//! e.g. `{"type":"OUTPUT_CHANGE","field":"score","value":42}`. Tag values and
//! field names are a stable contract with the guest bundle.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LayoutError, Result};

/// One message on the sandbox channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", deny_unknown_fields)]
pub enum SandboxMessage {
    /// Guest finished booting and accepts commands.
    #[serde(rename = "READY")]
    Ready,
    /// Paint compiled markup with the given context.
    #[serde(rename = "RENDER")]
    Render { html: String, context: Value },
    /// Guest painted the last `RENDER`.
    #[serde(rename = "RENDERED")]
    Rendered,
    /// Set one dotted path in the guest context.
    #[serde(rename = "UPDATE_CONTEXT")]
    UpdateContext { path: String, value: Value },
    /// A hydrated component edited an output field.
    #[serde(rename = "OUTPUT_CHANGE")]
    OutputChange { field: String, value: Value },
    /// Guest-side exception.
    #[serde(rename = "ERROR")]
    Error { error: String },
}

/// Message tag, used as the dispatch table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ready,
    Render,
    Rendered,
    UpdateContext,
    OutputChange,
    Error,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Ready => "READY",
            MessageKind::Render => "RENDER",
            MessageKind::Rendered => "RENDERED",
            MessageKind::UpdateContext => "UPDATE_CONTEXT",
            MessageKind::OutputChange => "OUTPUT_CHANGE",
            MessageKind::Error => "ERROR",
        }
    }
}

impl SandboxMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            SandboxMessage::Ready => MessageKind::Ready,
            SandboxMessage::Render { .. } => MessageKind::Render,
            SandboxMessage::Rendered => MessageKind::Rendered,
            SandboxMessage::UpdateContext { .. } => MessageKind::UpdateContext,
            SandboxMessage::OutputChange { .. } => MessageKind::OutputChange,
            SandboxMessage::Error { .. } => MessageKind::Error,
        }
    }

    /// Messages only the host may send.
    pub fn is_host_bound(&self) -> bool {
        matches!(
            self.kind(),
            MessageKind::Ready | MessageKind::Rendered | MessageKind::OutputChange | MessageKind::Error
        )
    }

    /// Encode to the JSON text that crosses the isolation boundary.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| LayoutError::Internal(format!("sandbox message encode failed: {e}")))
    }

    /// Decode JSON text received from the other side of the boundary.
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| LayoutError::BadRequest(format!("invalid sandbox message: {e}")))
    }
}

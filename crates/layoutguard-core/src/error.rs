//! Shared error type across layoutguard crates.

use thiserror::Error;

/// Client-facing error codes (stable API).
///
/// These strings travel inside `ERROR` sandbox messages and relay error frames,
/// so they must never change once published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCode {
    /// Expression or component rejected by the allowlist.
    PolicyViolation,
    /// Template failed to compile.
    SyntaxError,
    /// Iteration budget or nesting bound exceeded.
    ResourceExceeded,
    /// The isolated context reported an exception.
    TransportError,
    /// Component name not present in the registry.
    UnknownComponent,
    /// Component registered but outside the allowlist.
    DisallowedComponent,
    /// Named template missing from the source map.
    TemplateNotFound,
    /// Template evaluation failed (e.g. strict undefined).
    RenderError,
    /// Invalid input / malformed message or config.
    BadRequest,
    /// Ticket could not be resolved.
    AuthFailed,
    /// Internal error.
    Internal,
}

impl ClientCode {
    /// String representation used in JSON payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientCode::PolicyViolation => "POLICY_VIOLATION",
            ClientCode::SyntaxError => "SYNTAX_ERROR",
            ClientCode::ResourceExceeded => "RESOURCE_EXCEEDED",
            ClientCode::TransportError => "TRANSPORT_ERROR",
            ClientCode::UnknownComponent => "UNKNOWN_COMPONENT",
            ClientCode::DisallowedComponent => "DISALLOWED_COMPONENT",
            ClientCode::TemplateNotFound => "TEMPLATE_NOT_FOUND",
            ClientCode::RenderError => "RENDER_ERROR",
            ClientCode::BadRequest => "BAD_REQUEST",
            ClientCode::AuthFailed => "AUTH_FAILED",
            ClientCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, LayoutError>;

/// Unified error type used by core and runtime.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LayoutError {
    #[error("policy violation: {0}")]
    PolicyViolation(String),
    #[error("syntax error{}: {message}", line.map(|l| format!(" at line {l}")).unwrap_or_default())]
    Syntax {
        message: String,
        line: Option<usize>,
    },
    #[error("resource exceeded: {0}")]
    ResourceExceeded(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unknown component: {0}")]
    UnknownComponent(String),
    #[error("component not allowed: {0}")]
    DisallowedComponent(String),
    #[error("template not found: {0}")]
    TemplateNotFound(String),
    #[error("render failed: {0}")]
    Render(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("auth failed")]
    AuthFailed,
    #[error("internal: {0}")]
    Internal(String),
}

impl LayoutError {
    /// Map internal error to a stable client-facing code.
    pub fn client_code(&self) -> ClientCode {
        match self {
            LayoutError::PolicyViolation(_) => ClientCode::PolicyViolation,
            LayoutError::Syntax { .. } => ClientCode::SyntaxError,
            LayoutError::ResourceExceeded(_) => ClientCode::ResourceExceeded,
            LayoutError::Transport(_) => ClientCode::TransportError,
            LayoutError::UnknownComponent(_) => ClientCode::UnknownComponent,
            LayoutError::DisallowedComponent(_) => ClientCode::DisallowedComponent,
            LayoutError::TemplateNotFound(_) => ClientCode::TemplateNotFound,
            LayoutError::Render(_) => ClientCode::RenderError,
            LayoutError::BadRequest(_) => ClientCode::BadRequest,
            LayoutError::AuthFailed => ClientCode::AuthFailed,
            LayoutError::Internal(_) => ClientCode::Internal,
        }
    }
}

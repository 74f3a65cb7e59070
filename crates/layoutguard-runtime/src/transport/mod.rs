//! Relay transport (WebSocket).
//!
//! Exposes the collab upgrade handler and the codec that turns frames into
//! sync messages once, before they reach the hub.

pub mod codec;
pub mod ws;

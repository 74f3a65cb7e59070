//! layoutguard core: transport-agnostic wire contracts and the shared error surface.
//!
//! This crate defines the message protocols spoken between a host page and its
//! isolated rendering context, and between collaborative replicas and the relay.
//! It carries no transport or runtime dependencies so the guest side, the host
//! side and the relay can all share it.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `LayoutError`/`Result` so a hostile
//! template or a spoofed frame can never crash the host.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ClientCode, LayoutError, Result};

//! Protocol modules (sandbox channel + collaborative sync).
//!
//! This module hosts the two JSON wire formats:
//! - Sandbox: six tagged messages exchanged with one isolated context.
//! - Sync: document replication between replicas and the relay.
//!
//! All decoders are panic-free: malformed input is reported as `LayoutError`
//! instead of panicking, keeping the host resilient to hostile frames.

pub mod sandbox;
pub mod sync;

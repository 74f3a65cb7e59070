//! layoutguard runtime.
//!
//! Wires the security policy, template environment, component resolver,
//! sandbox transport and collaborative output store into one rendering
//! pipeline, plus the relay server that keeps collaborative replicas in step.
//! Consumed by the relay binary (`main.rs`) and by integration tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod app_state;
pub mod collab;
pub mod components;
pub mod config;
pub mod policy;
pub mod router;
pub mod sandbox;
pub mod session;
pub mod template;
pub mod transport;

pub use session::{LayoutSession, TaskContext};

//! Security policy layer (component allowlist, binding roots, context filtering).
//!
//! Compiles `SecurityConfig` into fast lookup structures for the template
//! environment, the component resolver and the session wiring to consume.

pub mod allowlist;
pub mod engine;

pub use engine::{Expression, PolicyDecision, SecurityPolicy};

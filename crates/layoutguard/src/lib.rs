//! Top-level facade crate for layoutguard.
//!
//! Re-exports the wire contracts and the rendering runtime so users can depend on a single crate.

pub mod core {
    pub use layoutguard_core::*;
}

pub mod runtime {
    pub use layoutguard_runtime::*;
}

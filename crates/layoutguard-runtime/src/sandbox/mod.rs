//! Sandbox transport: paints compiled output inside an isolated context and
//! exchanges the six sandbox messages with it.

pub mod frame;
pub mod guest;
pub mod manager;

pub use frame::{HostWindow, IsolatedFrame, MessageEvent, WindowRef, SANDBOX_ATTRIBUTES};
pub use guest::{GuestDocument, GuestFrame, GuestHandle};
pub use manager::{SandboxCallbacks, SandboxManager, TransportState};

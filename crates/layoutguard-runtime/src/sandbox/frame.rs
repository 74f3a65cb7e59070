//! Host window message bus and the isolated frame abstraction.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use layoutguard_core::error::{LayoutError, Result};

/// Sandbox attribute string for frames we create: scripts yes, origin trust no.
pub const SANDBOX_ATTRIBUTES: &str = "allow-scripts";

/// Identity of a browsing context (`event.source` / `contentWindow`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowRef(u64);

impl WindowRef {
    /// Fresh identity, never reused within the process.
    pub fn next() -> Self {
        static SEQ: AtomicU64 = AtomicU64::new(1);
        WindowRef(SEQ.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// One `message` event delivered to the host window.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub source: WindowRef,
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The host page's `message` event target.
///
/// Every frame posts here with its own window as source; every registered
/// listener sees every event and must filter by source itself.
#[derive(Default)]
pub struct HostWindow {
    listeners: DashMap<ListenerId, mpsc::UnboundedSender<MessageEvent>>,
    seq: AtomicU64,
}

impl HostWindow {
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            seq: AtomicU64::new(1),
        }
    }

    pub fn add_listener(&self) -> (ListenerId, mpsc::UnboundedReceiver<MessageEvent>) {
        let id = ListenerId(self.seq.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.insert(id, tx);
        (id, rx)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// `window.parent.postMessage(data, "*")` from `source`.
    pub fn post(&self, source: WindowRef, data: String) {
        // Listeners whose receiver is gone are pruned lazily.
        let mut dead = Vec::new();
        for entry in self.listeners.iter() {
            let ev = MessageEvent {
                source,
                data: data.clone(),
            };
            if entry.value().send(ev).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.listeners.remove(&id);
        }
    }
}

/// An isolated browsing context the host can talk to only by messages.
pub trait IsolatedFrame: Send + Sync {
    /// The frame's `contentWindow`.
    fn window(&self) -> WindowRef;

    /// Value of the frame's `sandbox` attribute.
    fn sandbox_attributes(&self) -> &str;

    /// Insert into the document and start loading. Called once, after the
    /// host listener is registered.
    fn attach(&self) -> Result<()>;

    /// `contentWindow.postMessage(data, "*")`.
    fn post_message(&self, data: String) -> Result<()>;

    /// Remove the element. Idempotent.
    fn remove(&self);

    fn is_attached(&self) -> bool;
}

/// Scripts must run, same-origin trust must never be granted.
pub fn validate_sandbox_attributes(attrs: &str) -> Result<()> {
    let tokens: Vec<&str> = attrs.split_whitespace().collect();
    if tokens.contains(&"allow-same-origin") {
        return Err(LayoutError::Transport(
            "sandbox must not grant allow-same-origin".into(),
        ));
    }
    if !tokens.contains(&"allow-scripts") {
        return Err(LayoutError::Transport(
            "sandbox must grant allow-scripts".into(),
        ));
    }
    Ok(())
}

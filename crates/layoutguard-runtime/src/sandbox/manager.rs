//! Host-side sandbox manager.
//!
//! Lifecycle:
//! - `mount`: register the host listener, attach the frame, start the pump.
//! - `Waiting`: outbound calls are queued.
//! - `Ready` (first `READY` from the managed window): queue flushed once, in
//!   order; later calls pass straight through.
//! - `destroy`: listener removed, pump stopped, frame removed. Terminal.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::task::JoinHandle;

use layoutguard_core::error::{LayoutError, Result};
use layoutguard_core::protocol::sandbox::{MessageKind, SandboxMessage};

use super::frame::{validate_sandbox_attributes, HostWindow, IsolatedFrame, ListenerId, MessageEvent};

pub type RenderedCallback = Arc<dyn Fn() + Send + Sync>;
pub type OutputChangeCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&LayoutError) + Send + Sync>;

#[derive(Clone, Default)]
pub struct SandboxCallbacks {
    pub on_rendered: Option<RenderedCallback>,
    pub on_output_change: Option<OutputChangeCallback>,
    pub on_error: Option<ErrorCallback>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Waiting,
    Ready,
    /// Ready, but the guest's last report was an `ERROR`.
    Errored,
    Destroyed,
}

type Handler = fn(&ManagerInner, SandboxMessage);

struct ManagerState {
    phase: TransportState,
    queue: VecDeque<SandboxMessage>,
    last_error: Option<LayoutError>,
}

struct ManagerInner {
    frame: Arc<dyn IsolatedFrame>,
    host: Arc<HostWindow>,
    listener: ListenerId,
    callbacks: SandboxCallbacks,
    handlers: HashMap<MessageKind, Handler>,
    state: Mutex<ManagerState>,
}

pub struct SandboxManager {
    inner: Arc<ManagerInner>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

fn dispatch_table() -> HashMap<MessageKind, Handler> {
    let mut t: HashMap<MessageKind, Handler> = HashMap::new();
    t.insert(MessageKind::Ready, ManagerInner::on_ready);
    t.insert(MessageKind::Rendered, ManagerInner::on_rendered);
    t.insert(MessageKind::OutputChange, ManagerInner::on_output_change);
    t.insert(MessageKind::Error, ManagerInner::on_error);
    t
}

impl SandboxManager {
    /// Mount a frame. Must be called from within a tokio runtime.
    pub fn mount(
        host: Arc<HostWindow>,
        frame: Arc<dyn IsolatedFrame>,
        callbacks: SandboxCallbacks,
    ) -> Result<Self> {
        validate_sandbox_attributes(frame.sandbox_attributes())?;
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|_| LayoutError::Internal("sandbox manager needs a tokio runtime".into()))?;

        let (listener, mut rx) = host.add_listener();
        let inner = Arc::new(ManagerInner {
            frame,
            host,
            listener,
            callbacks,
            handlers: dispatch_table(),
            state: Mutex::new(ManagerState {
                phase: TransportState::Waiting,
                queue: VecDeque::new(),
                last_error: None,
            }),
        });

        let pump_inner = Arc::clone(&inner);
        let pump = rt.spawn(async move {
            while let Some(ev) = rx.recv().await {
                pump_inner.handle_event(ev);
            }
        });

        let manager = Self {
            inner,
            pump: Mutex::new(Some(pump)),
        };

        if let Err(e) = manager.inner.frame.attach() {
            manager.destroy();
            return Err(e);
        }
        tracing::debug!(window = manager.inner.frame.window().id(), "sandbox mounted");
        Ok(manager)
    }

    pub fn state(&self) -> TransportState {
        match self.inner.phase() {
            TransportState::Ready if self.is_errored() => TransportState::Errored,
            phase => phase,
        }
    }

    /// Last `ERROR` reported by the guest, until the next successful paint.
    pub fn last_error(&self) -> Option<LayoutError> {
        self.inner
            .state
            .lock()
            .ok()
            .and_then(|s| s.last_error.clone())
    }

    pub fn is_errored(&self) -> bool {
        self.last_error().is_some()
    }

    /// Outbound calls queued while waiting for `READY`.
    pub fn queued(&self) -> usize {
        self.inner.state.lock().map(|s| s.queue.len()).unwrap_or(0)
    }

    pub fn render(&self, html: impl Into<String>, context: Value) -> Result<()> {
        self.inner.send(SandboxMessage::Render {
            html: html.into(),
            context,
        })
    }

    pub fn update_context(&self, path: impl Into<String>, value: Value) -> Result<()> {
        self.inner.send(SandboxMessage::UpdateContext {
            path: path.into(),
            value,
        })
    }

    /// Same entry point the pump uses; exposed for hosts that own their own
    /// event loop.
    pub fn handle_event(&self, ev: MessageEvent) {
        self.inner.handle_event(ev);
    }

    /// Tear down synchronously. Idempotent.
    pub fn destroy(&self) {
        {
            let Ok(mut st) = self.inner.state.lock() else {
                return;
            };
            if st.phase == TransportState::Destroyed {
                return;
            }
            st.phase = TransportState::Destroyed;
            st.queue.clear();
        }

        self.inner.host.remove_listener(self.inner.listener);
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(handle) = pump.take() {
                handle.abort();
            }
        }
        self.inner.frame.remove();
        tracing::debug!(window = self.inner.frame.window().id(), "sandbox destroyed");
    }
}

impl Drop for SandboxManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl ManagerInner {
    fn phase(&self) -> TransportState {
        // Poisoned state is treated as torn down.
        self.state
            .lock()
            .map(|s| s.phase)
            .unwrap_or(TransportState::Destroyed)
    }

    fn send(&self, msg: SandboxMessage) -> Result<()> {
        let mut st = self
            .state
            .lock()
            .map_err(|_| LayoutError::Internal("sandbox state poisoned".into()))?;
        match st.phase {
            TransportState::Destroyed => Err(LayoutError::Transport(
                "sandbox transport destroyed".into(),
            )),
            TransportState::Waiting => {
                st.queue.push_back(msg);
                Ok(())
            }
            TransportState::Ready | TransportState::Errored => {
                self.frame.post_message(msg.encode()?)
            }
        }
    }

    fn handle_event(&self, ev: MessageEvent) {
        if ev.source != self.frame.window() {
            tracing::debug!(source = ev.source.id(), "ignoring message from foreign window");
            return;
        }
        if self.phase() == TransportState::Destroyed {
            return;
        }

        let msg = match SandboxMessage::decode(&ev.data) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed sandbox message");
                return;
            }
        };

        match self.handlers.get(&msg.kind()) {
            Some(handler) => handler(self, msg),
            None => tracing::debug!(kind = msg.kind().as_str(), "ignoring guest-bound message kind"),
        }
    }

    fn on_ready(&self, _msg: SandboxMessage) {
        let Ok(mut st) = self.state.lock() else {
            return;
        };
        if st.phase != TransportState::Waiting {
            tracing::debug!("duplicate READY ignored");
            return;
        }
        st.phase = TransportState::Ready;

        let queued = st.queue.len();
        while let Some(msg) = st.queue.pop_front() {
            let sent = msg.encode().and_then(|raw| self.frame.post_message(raw));
            if let Err(e) = sent {
                tracing::warn!(error = %e, "failed to flush queued sandbox message");
            }
        }
        tracing::debug!(queued, "sandbox ready; queue flushed");
    }

    fn on_rendered(&self, _msg: SandboxMessage) {
        if let Ok(mut st) = self.state.lock() {
            st.last_error = None;
        }
        if let Some(cb) = &self.callbacks.on_rendered {
            cb();
        }
    }

    fn on_output_change(&self, msg: SandboxMessage) {
        let SandboxMessage::OutputChange { field, value } = msg else {
            return;
        };
        if let Some(cb) = &self.callbacks.on_output_change {
            cb(&field, &value);
        }
    }

    fn on_error(&self, msg: SandboxMessage) {
        let SandboxMessage::Error { error } = msg else {
            return;
        };
        let err = LayoutError::Transport(error);
        tracing::warn!(error = %err, "sandbox reported an error");
        if let Ok(mut st) = self.state.lock() {
            st.last_error = Some(err.clone());
        }
        if let Some(cb) = &self.callbacks.on_error {
            cb(&err);
        }
    }
}

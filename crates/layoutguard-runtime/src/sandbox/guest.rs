//! In-process isolated context.
//!
//! The guest shares nothing with the host but the message channel: it gets
//! encoded JSON text in, and posts encoded JSON text to the host window with
//! its own window identity as source. Placeholders are hydrated here through
//! the component resolver.

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use layoutguard_core::error::{LayoutError, Result};
use layoutguard_core::protocol::sandbox::SandboxMessage;

use crate::components::placeholder::{
    disallowed_block, error_block, escape_html, find_placeholders, unknown_block, MarkerKind,
    Placeholder,
};
use crate::components::ComponentResolver;

use super::frame::{HostWindow, IsolatedFrame, WindowRef, SANDBOX_ATTRIBUTES};

/// What the guest has painted so far.
#[derive(Debug, Clone, Default)]
pub struct GuestDocument {
    pub html: String,
    pub context: Value,
    pub renders: usize,
}

struct GuestShared {
    window: WindowRef,
    host: Arc<HostWindow>,
    resolver: ComponentResolver,
    document: Mutex<GuestDocument>,
}

impl GuestShared {
    fn post(&self, msg: SandboxMessage) {
        match msg.encode() {
            Ok(raw) => self.host.post(self.window, raw),
            Err(e) => tracing::warn!(error = %e, "guest failed to encode message"),
        }
    }
}

pub struct GuestFrame {
    shared: Arc<GuestShared>,
    inbox: Mutex<Option<mpsc::UnboundedSender<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GuestFrame {
    pub fn new(host: Arc<HostWindow>, resolver: ComponentResolver) -> Self {
        Self {
            shared: Arc::new(GuestShared {
                window: WindowRef::next(),
                host,
                resolver,
                document: Mutex::new(GuestDocument::default()),
            }),
            inbox: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Handle for simulating in-frame activity (component edits, crashes).
    pub fn handle(&self) -> GuestHandle {
        GuestHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl IsolatedFrame for GuestFrame {
    fn window(&self) -> WindowRef {
        self.shared.window
    }

    fn sandbox_attributes(&self) -> &str {
        SANDBOX_ATTRIBUTES
    }

    fn attach(&self) -> Result<()> {
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|_| LayoutError::Internal("guest frame needs a tokio runtime".into()))?;
        let mut inbox = self
            .inbox
            .lock()
            .map_err(|_| LayoutError::Internal("guest inbox poisoned".into()))?;
        if inbox.is_some() {
            return Err(LayoutError::Transport("frame already attached".into()));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *inbox = Some(tx);

        let shared = Arc::clone(&self.shared);
        let task = rt.spawn(async move {
            shared.post(SandboxMessage::Ready);
            while let Some(raw) = rx.recv().await {
                handle_inbound(&shared, &raw).await;
            }
        });
        if let Ok(mut t) = self.task.lock() {
            *t = Some(task);
        }
        Ok(())
    }

    fn post_message(&self, data: String) -> Result<()> {
        let inbox = self
            .inbox
            .lock()
            .map_err(|_| LayoutError::Internal("guest inbox poisoned".into()))?;
        let tx = inbox
            .as_ref()
            .ok_or_else(|| LayoutError::Transport("frame not attached".into()))?;
        tx.send(data)
            .map_err(|_| LayoutError::Transport("frame removed".into()))
    }

    fn remove(&self) {
        if let Ok(mut inbox) = self.inbox.lock() {
            inbox.take();
        }
        if let Ok(mut task) = self.task.lock() {
            if let Some(t) = task.take() {
                t.abort();
            }
        }
    }

    fn is_attached(&self) -> bool {
        self.inbox.lock().map(|i| i.is_some()).unwrap_or(false)
    }
}

impl Drop for GuestFrame {
    fn drop(&mut self) {
        self.remove();
    }
}

/// In-frame view for tests and embedders.
#[derive(Clone)]
pub struct GuestHandle {
    shared: Arc<GuestShared>,
}

impl GuestHandle {
    pub fn window(&self) -> WindowRef {
        self.shared.window
    }

    pub fn document(&self) -> GuestDocument {
        self.shared
            .document
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// A hydrated component edited `field`.
    pub fn emit_output_change(&self, field: impl Into<String>, value: Value) {
        self.shared.post(SandboxMessage::OutputChange {
            field: field.into(),
            value,
        });
    }

    /// An uncaught exception inside the frame.
    pub fn report_error(&self, error: impl Into<String>) {
        self.shared.post(SandboxMessage::Error {
            error: error.into(),
        });
    }
}

async fn handle_inbound(shared: &GuestShared, raw: &str) {
    let msg = match SandboxMessage::decode(raw) {
        Ok(m) => m,
        Err(e) => {
            shared.post(SandboxMessage::Error {
                error: e.to_string(),
            });
            return;
        }
    };

    match msg {
        SandboxMessage::Render { html, context } => {
            let painted = hydrate(&shared.resolver, &html).await;
            match painted {
                Ok(painted) => {
                    if let Ok(mut doc) = shared.document.lock() {
                        doc.html = painted;
                        doc.context = context;
                        doc.renders += 1;
                    }
                    shared.post(SandboxMessage::Rendered);
                }
                Err(e) => shared.post(SandboxMessage::Error {
                    error: e.to_string(),
                }),
            }
        }
        SandboxMessage::UpdateContext { path, value } => {
            let res = shared
                .document
                .lock()
                .map_err(|_| LayoutError::Internal("guest document poisoned".into()))
                .and_then(|mut doc| set_path(&mut doc.context, &path, value));
            if let Err(e) = res {
                shared.post(SandboxMessage::Error {
                    error: e.to_string(),
                });
            }
        }
        other => {
            tracing::debug!(kind = other.kind().as_str(), "guest ignoring host-bound message");
        }
    }
}

/// Replace every live placeholder with its component's markup.
pub async fn hydrate(resolver: &ComponentResolver, html: &str) -> Result<String> {
    let placeholders = find_placeholders(html)?;

    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    for ph in placeholders {
        out.push_str(&html[last..ph.span.start]);
        out.push_str(&hydrate_one(resolver, &ph).await);
        last = ph.span.end;
    }
    out.push_str(&html[last..]);
    Ok(out)
}

async fn hydrate_one(resolver: &ComponentResolver, ph: &Placeholder) -> String {
    let Some(handle) = resolver.resolve(&ph.name) else {
        return if resolver.registry().contains(&ph.name) {
            disallowed_block(&ph.name)
        } else {
            unknown_block(&ph.name)
        };
    };

    let props = match &ph.props {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(component = %ph.name, error = %e, "placeholder props unreadable");
            return error_block(
                MarkerKind::HydrationFailed,
                &ph.name,
                &format!("Invalid props: {e}"),
            );
        }
    };

    if let Some(missing) = resolver
        .registry()
        .get(&ph.name)
        .and_then(|entry| entry.schema)
        .and_then(|schema| schema.missing(props).map(str::to_string))
    {
        return error_block(
            MarkerKind::MissingProp,
            &ph.name,
            &format!("Missing required prop \"{missing}\""),
        );
    }

    let rendered = match handle.load().await {
        Ok(component) => component.hydrate(props),
        Err(e) => Err(e),
    };
    match rendered {
        Ok(markup) => format!(
            "<div data-component=\"{}\" data-hydrated=\"true\">{}</div>",
            escape_html(&ph.name),
            markup
        ),
        Err(e) => {
            tracing::warn!(component = %ph.name, error = %e, "hydration failed");
            error_block(MarkerKind::HydrationFailed, &ph.name, &e.to_string())
        }
    }
}

/// Set `value` at a dotted path, creating intermediate objects.
pub fn set_path(root: &mut Value, path: &str, value: Value) -> Result<()> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(LayoutError::BadRequest(format!("invalid context path: {path:?}")));
    }

    let Some((leaf, parents)) = segments.split_last() else {
        return Err(LayoutError::BadRequest("empty context path".into()));
    };

    let mut cur = root;
    for seg in parents {
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        let Value::Object(map) = cur else {
            return Err(LayoutError::Internal("context node is not an object".into()));
        };
        cur = map
            .entry((*seg).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !cur.is_object() {
        *cur = Value::Object(Map::new());
    }
    let Value::Object(map) = cur else {
        return Err(LayoutError::Internal("context node is not an object".into()));
    };
    map.insert((*leaf).to_string(), value);
    Ok(())
}

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use layoutguard_core::error::{LayoutError, Result};
use layoutguard_core::protocol::sandbox::SandboxMessage;
use layoutguard_runtime::components::placeholder::live_placeholder;
use layoutguard_runtime::components::{
    Component, ComponentCategory, ComponentRegistry, ComponentResolver, PropSchema,
};
use layoutguard_runtime::sandbox::guest::{hydrate, set_path};
use layoutguard_runtime::sandbox::{
    GuestFrame, HostWindow, IsolatedFrame, MessageEvent, SandboxCallbacks, SandboxManager,
    TransportState, WindowRef, SANDBOX_ATTRIBUTES,
};

/// Frame that records what the host posts and never answers on its own.
struct RecordingFrame {
    window: WindowRef,
    attrs: &'static str,
    posted: Mutex<Vec<String>>,
    attached: AtomicBool,
    removed: AtomicBool,
}

impl RecordingFrame {
    fn new() -> Arc<Self> {
        Self::with_attrs(SANDBOX_ATTRIBUTES)
    }

    fn with_attrs(attrs: &'static str) -> Arc<Self> {
        Arc::new(Self {
            window: WindowRef::next(),
            attrs,
            posted: Mutex::new(Vec::new()),
            attached: AtomicBool::new(false),
            removed: AtomicBool::new(false),
        })
    }

    fn posted(&self) -> Vec<SandboxMessage> {
        self.posted
            .lock()
            .unwrap()
            .iter()
            .map(|raw| SandboxMessage::decode(raw).unwrap())
            .collect()
    }

    fn event(&self, msg: SandboxMessage) -> MessageEvent {
        MessageEvent {
            source: self.window,
            data: msg.encode().unwrap(),
        }
    }
}

impl IsolatedFrame for RecordingFrame {
    fn window(&self) -> WindowRef {
        self.window
    }
    fn sandbox_attributes(&self) -> &str {
        self.attrs
    }
    fn attach(&self) -> Result<()> {
        self.attached.store(true, Ordering::SeqCst);
        Ok(())
    }
    fn post_message(&self, data: String) -> Result<()> {
        self.posted.lock().unwrap().push(data);
        Ok(())
    }
    fn remove(&self) {
        self.attached.store(false, Ordering::SeqCst);
        self.removed.store(true, Ordering::SeqCst);
    }
    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }
}

fn html_of(msg: &SandboxMessage) -> &str {
    match msg {
        SandboxMessage::Render { html, .. } => html,
        other => panic!("expected RENDER, got {other:?}"),
    }
}

#[tokio::test]
async fn calls_before_ready_are_flushed_once_in_order() {
    let host = Arc::new(HostWindow::new());
    let frame = RecordingFrame::new();
    let mgr = SandboxManager::mount(Arc::clone(&host), frame.clone(), SandboxCallbacks::default())
        .unwrap();

    mgr.render("<p>1</p>", json!({})).unwrap();
    mgr.update_context("output.score", json!(3)).unwrap();
    mgr.render("<p>2</p>", json!({})).unwrap();

    assert_eq!(mgr.state(), TransportState::Waiting);
    assert_eq!(mgr.queued(), 3);
    assert!(frame.posted().is_empty());

    mgr.handle_event(frame.event(SandboxMessage::Ready));
    let posted = frame.posted();
    assert_eq!(posted.len(), 3);
    assert_eq!(html_of(&posted[0]), "<p>1</p>");
    assert_eq!(
        posted[1],
        SandboxMessage::UpdateContext {
            path: "output.score".into(),
            value: json!(3)
        }
    );
    assert_eq!(html_of(&posted[2]), "<p>2</p>");
    assert_eq!(mgr.state(), TransportState::Ready);
    assert_eq!(mgr.queued(), 0);

    // A second READY flushes nothing again.
    mgr.handle_event(frame.event(SandboxMessage::Ready));
    assert_eq!(frame.posted().len(), 3);

    // Ready: straight through.
    mgr.render("<p>3</p>", json!({})).unwrap();
    assert_eq!(frame.posted().len(), 4);
}

#[tokio::test]
async fn messages_from_other_windows_are_ignored() {
    let host = Arc::new(HostWindow::new());
    let frame = RecordingFrame::new();
    let changes = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&changes);
    let callbacks = SandboxCallbacks {
        on_output_change: Some(Arc::new(move |_: &str, _: &Value| {
            c.fetch_add(1, Ordering::SeqCst);
        })),
        ..Default::default()
    };
    let mgr = SandboxManager::mount(Arc::clone(&host), frame.clone(), callbacks).unwrap();
    mgr.render("<p/>", json!({})).unwrap();

    let spoof = WindowRef::next();
    for msg in [
        SandboxMessage::Ready,
        SandboxMessage::OutputChange {
            field: "score".into(),
            value: json!(1),
        },
    ] {
        mgr.handle_event(MessageEvent {
            source: spoof,
            data: msg.encode().unwrap(),
        });
    }

    assert_eq!(mgr.state(), TransportState::Waiting);
    assert_eq!(mgr.queued(), 1);
    assert!(frame.posted().is_empty());
    assert_eq!(changes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_messages_change_nothing() {
    let host = Arc::new(HostWindow::new());
    let frame = RecordingFrame::new();
    let mgr = SandboxManager::mount(host, frame.clone(), SandboxCallbacks::default()).unwrap();

    mgr.handle_event(MessageEvent {
        source: frame.window(),
        data: "{not json".into(),
    });
    mgr.handle_event(MessageEvent {
        source: frame.window(),
        data: r#"{"type":"ready"}"#.into(),
    });
    assert_eq!(mgr.state(), TransportState::Waiting);
}

#[tokio::test]
async fn guest_events_reach_callbacks() {
    let host = Arc::new(HostWindow::new());
    let frame = RecordingFrame::new();

    let rendered = Arc::new(AtomicUsize::new(0));
    let changes: Arc<Mutex<Vec<(String, Value)>>> = Arc::default();
    let errors: Arc<Mutex<Vec<LayoutError>>> = Arc::default();

    let (r, ch, er) = (Arc::clone(&rendered), Arc::clone(&changes), Arc::clone(&errors));
    let callbacks = SandboxCallbacks {
        on_rendered: Some(Arc::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        })),
        on_output_change: Some(Arc::new(move |f: &str, v: &Value| {
            ch.lock().unwrap().push((f.to_string(), v.clone()));
        })),
        on_error: Some(Arc::new(move |e: &LayoutError| {
            er.lock().unwrap().push(e.clone());
        })),
    };
    let mgr = SandboxManager::mount(host, frame.clone(), callbacks).unwrap();
    mgr.handle_event(frame.event(SandboxMessage::Ready));

    mgr.handle_event(frame.event(SandboxMessage::Rendered));
    mgr.handle_event(frame.event(SandboxMessage::OutputChange {
        field: "entities".into(),
        value: json!([{"start": 0}]),
    }));
    assert_eq!(rendered.load(Ordering::SeqCst), 1);
    assert_eq!(
        changes.lock().unwrap().as_slice(),
        &[("entities".to_string(), json!([{"start": 0}]))]
    );

    mgr.handle_event(frame.event(SandboxMessage::Error {
        error: "TypeError: x is undefined".into(),
    }));
    assert_eq!(mgr.state(), TransportState::Errored);
    assert!(matches!(mgr.last_error(), Some(LayoutError::Transport(ref m)) if m.contains("TypeError")));
    assert_eq!(errors.lock().unwrap().len(), 1);
    // Still mounted: calls keep flowing.
    mgr.render("<p/>", json!({})).unwrap();

    mgr.handle_event(frame.event(SandboxMessage::Rendered));
    assert_eq!(mgr.state(), TransportState::Ready);
    assert!(!mgr.is_errored());
}

#[tokio::test]
async fn destroy_removes_listener_and_frame() {
    let host = Arc::new(HostWindow::new());
    let frame = RecordingFrame::new();
    let mgr = SandboxManager::mount(Arc::clone(&host), frame.clone(), SandboxCallbacks::default())
        .unwrap();
    assert_eq!(host.listener_count(), 1);
    assert!(frame.is_attached());

    mgr.destroy();
    assert_eq!(host.listener_count(), 0);
    assert!(frame.removed.load(Ordering::SeqCst));
    assert_eq!(mgr.state(), TransportState::Destroyed);

    let err = mgr.render("<p/>", json!({})).unwrap_err();
    assert_eq!(err.client_code().as_str(), "TRANSPORT_ERROR");

    // No way back to waiting.
    mgr.handle_event(frame.event(SandboxMessage::Ready));
    assert_eq!(mgr.state(), TransportState::Destroyed);
    mgr.destroy();
}

#[tokio::test]
async fn dropping_the_manager_tears_down() {
    let host = Arc::new(HostWindow::new());
    let frame = RecordingFrame::new();
    {
        let _mgr =
            SandboxManager::mount(Arc::clone(&host), frame.clone(), SandboxCallbacks::default())
                .unwrap();
        assert_eq!(host.listener_count(), 1);
    }
    assert_eq!(host.listener_count(), 0);
    assert!(!frame.is_attached());
}

#[tokio::test]
async fn same_origin_sandbox_is_refused() {
    let host = Arc::new(HostWindow::new());
    let frame = RecordingFrame::with_attrs("allow-scripts allow-same-origin");
    let res = SandboxManager::mount(Arc::clone(&host), frame.clone(), SandboxCallbacks::default());
    assert!(res.is_err());
    assert_eq!(host.listener_count(), 0);
    assert!(!frame.is_attached());

    let frame = RecordingFrame::with_attrs("allow-forms");
    assert!(SandboxManager::mount(host, frame, SandboxCallbacks::default()).is_err());
}

#[test]
fn mount_outside_runtime_fails_cleanly() {
    let host = Arc::new(HostWindow::new());
    let res = SandboxManager::mount(Arc::clone(&host), RecordingFrame::new(), SandboxCallbacks::default());
    assert!(res.is_err());
    assert_eq!(host.listener_count(), 0);
}

struct Tagger;

impl Component for Tagger {
    fn name(&self) -> &str {
        "NERTagger"
    }
    fn hydrate(&self, props: &Value) -> Result<String> {
        let n = props["value"].as_array().map(Vec::len).unwrap_or(0);
        Ok(format!("<ner-tagger entities=\"{n}\"></ner-tagger>"))
    }
}

struct Exploding;

impl Component for Exploding {
    fn name(&self) -> &str {
        "Exploding"
    }
    fn hydrate(&self, _props: &Value) -> Result<String> {
        Err(LayoutError::Render("boom".into()))
    }
}

fn resolver() -> ComponentResolver {
    let registry = Arc::new(ComponentRegistry::new());
    registry
        .register(
            ComponentCategory::Annotation,
            Arc::new(Tagger),
            Some(PropSchema::required(["value"])),
        )
        .unwrap();
    registry
        .register(ComponentCategory::Custom, Arc::new(Exploding), None)
        .unwrap();
    ComponentResolver::new(registry)
}

#[tokio::test]
async fn hydrate_replaces_placeholders_and_degrades_failures() {
    let html = format!(
        "<h1>t</h1>{}{}{}{}",
        live_placeholder("NERTagger", &json!({"value": [1, 2]})).unwrap(),
        live_placeholder("NERTagger", &json!({})).unwrap(),
        live_placeholder("Ghost", &json!({})).unwrap(),
        live_placeholder("Exploding", &json!({})).unwrap(),
    );
    let out = hydrate(&resolver(), &html).await.unwrap();

    assert!(out.starts_with("<h1>t</h1>"));
    assert!(out.contains(r#"<ner-tagger entities="2"></ner-tagger>"#), "{out}");
    assert!(out.contains(r#"data-layout-error="missing-prop""#));
    assert!(out.contains(r#"data-layout-error="unknown-component""#));
    assert!(out.contains(r#"data-layout-error="hydration-failed""#));
    assert!(!out.contains("data-props"));
}

#[tokio::test]
async fn hydrate_marks_resolver_disallowed_components() {
    let r = resolver()
        .with_allowed_components(&["Exploding".to_string()])
        .unwrap();
    let html = live_placeholder("NERTagger", &json!({"value": []})).unwrap();
    let out = hydrate(&r, &html).await.unwrap();
    assert!(out.contains("not allowed"), "{out}");
}

#[tokio::test]
async fn unreadable_props_degrade_only_their_placeholder() {
    let html = format!(
        "{}<div data-component=\"NERTagger\" data-props='{{not json'></div>",
        live_placeholder("NERTagger", &json!({"value": [1]})).unwrap(),
    );
    let out = hydrate(&resolver(), &html).await.unwrap();

    assert!(out.starts_with(r#"<div data-component="NERTagger" data-hydrated="true"><ner-tagger entities="1">"#), "{out}");
    assert!(out.contains(r#"data-layout-error="hydration-failed""#), "{out}");
    assert!(out.contains("Invalid props"));
}

#[test]
fn set_path_creates_intermediate_objects() {
    let mut ctx = json!({"output": {"a": 1}});
    set_path(&mut ctx, "output.entities", json!([])).unwrap();
    set_path(&mut ctx, "context.meta.id", json!(7)).unwrap();
    assert_eq!(ctx, json!({"output": {"a": 1, "entities": []}, "context": {"meta": {"id": 7}}}));
    assert!(set_path(&mut ctx, "output..x", json!(1)).is_err());
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out")
        .expect("channel open")
}

#[tokio::test]
async fn guest_runtime_round_trip() {
    let host = Arc::new(HostWindow::new());
    let guest = Arc::new(GuestFrame::new(Arc::clone(&host), resolver()));
    let inside = guest.handle();

    let (rendered_tx, mut rendered_rx) = mpsc::unbounded_channel();
    let (change_tx, mut change_rx) = mpsc::unbounded_channel();
    let (error_tx, mut error_rx) = mpsc::unbounded_channel();
    let callbacks = SandboxCallbacks {
        on_rendered: Some(Arc::new(move || {
            let _ = rendered_tx.send(());
        })),
        on_output_change: Some(Arc::new(move |f: &str, v: &Value| {
            let _ = change_tx.send((f.to_string(), v.clone()));
        })),
        on_error: Some(Arc::new(move |e: &LayoutError| {
            let _ = error_tx.send(e.to_string());
        })),
    };

    let mgr = SandboxManager::mount(Arc::clone(&host), guest.clone(), callbacks).unwrap();
    let page = format!(
        "<main>{}</main>",
        live_placeholder("NERTagger", &json!({"value": []})).unwrap()
    );
    mgr.render(page, json!({"output": {"entities": []}})).unwrap();

    recv(&mut rendered_rx).await;
    assert_eq!(mgr.state(), TransportState::Ready);
    let doc = inside.document();
    assert_eq!(doc.renders, 1);
    assert!(doc.html.contains("<ner-tagger"), "{}", doc.html);

    mgr.update_context("output.entities", json!([{"start": 1}])).unwrap();
    inside.emit_output_change("entities", json!([{"start": 1}]));
    let (field, value) = recv(&mut change_rx).await;
    assert_eq!(field, "entities");
    assert_eq!(value, json!([{"start": 1}]));
    // UPDATE_CONTEXT is applied by the guest task on its own schedule.
    tokio::time::timeout(Duration::from_secs(2), async {
        while inside.document().context["output"]["entities"] != json!([{"start": 1}]) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("context update applied");

    inside.report_error("ReferenceError: foo");
    let msg = recv(&mut error_rx).await;
    assert!(msg.contains("ReferenceError"));
    assert_eq!(mgr.state(), TransportState::Errored);

    mgr.destroy();
    assert_eq!(host.listener_count(), 0);
    assert!(!guest.is_attached());
}

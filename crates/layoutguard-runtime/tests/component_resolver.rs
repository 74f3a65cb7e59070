#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use layoutguard_core::error::{LayoutError, Result};
use layoutguard_runtime::components::{
    Component, ComponentCallback, ComponentCategory, ComponentLoader, ComponentRegistry,
    ComponentResolver, PropSchema, Resolution,
};

struct Echo(&'static str);

impl Component for Echo {
    fn name(&self) -> &str {
        self.0
    }
    fn hydrate(&self, props: &Value) -> Result<String> {
        Ok(format!("<span>{}</span>", props))
    }
}

struct CountingLoader {
    loads: Arc<AtomicUsize>,
    fail: bool,
}

#[async_trait]
impl ComponentLoader for CountingLoader {
    async fn load(&self) -> Result<Arc<dyn Component>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(LayoutError::Internal("bundle failed to load".into()));
        }
        Ok(Arc::new(Echo("Lazy")))
    }
}

fn counter() -> (Arc<AtomicUsize>, ComponentCallback) {
    let n = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&n);
    let cb: ComponentCallback = Arc::new(move |_name: &str| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    (n, cb)
}

fn registry_with_known() -> Arc<ComponentRegistry> {
    let r = Arc::new(ComponentRegistry::new());
    r.register(ComponentCategory::Annotation, Arc::new(Echo("Known")), None)
        .unwrap();
    r
}

#[test]
fn missing_component_calls_on_unknown_once() {
    let (unknown, on_unknown) = counter();
    let (disallowed, on_disallowed) = counter();
    let resolver = ComponentResolver::new(registry_with_known())
        .on_unknown_component(on_unknown)
        .on_disallowed_component(on_disallowed);

    assert!(resolver.resolve("Missing").is_none());
    assert_eq!(unknown.load(Ordering::SeqCst), 1);
    assert_eq!(disallowed.load(Ordering::SeqCst), 0);
}

#[test]
fn known_but_outside_allowlist_calls_on_disallowed_only() {
    let (unknown, on_unknown) = counter();
    let (disallowed, on_disallowed) = counter();
    let resolver = ComponentResolver::new(registry_with_known())
        .with_allowed_components(&["Other".to_string()])
        .unwrap()
        .on_unknown_component(on_unknown)
        .on_disallowed_component(on_disallowed);

    assert!(resolver.resolve("Known").is_none());
    assert_eq!(disallowed.load(Ordering::SeqCst), 1);
    assert_eq!(unknown.load(Ordering::SeqCst), 0);
}

#[test]
fn unknown_takes_priority_over_disallowed() {
    let resolver = ComponentResolver::new(registry_with_known())
        .with_allowed_components(&["Other".to_string()])
        .unwrap();
    assert!(matches!(resolver.classify("Missing"), Resolution::Unknown));
    assert!(matches!(resolver.classify("Known"), Resolution::Disallowed));
}

#[test]
fn classify_and_can_resolve_have_no_side_effects() {
    let (unknown, on_unknown) = counter();
    let resolver = ComponentResolver::new(registry_with_known()).on_unknown_component(on_unknown);

    assert!(!resolver.can_resolve("Missing"));
    assert!(resolver.can_resolve("Known"));
    assert_eq!(unknown.load(Ordering::SeqCst), 0);
}

#[test]
fn get_allowed_is_sorted_and_filtered() {
    let r = registry_with_known();
    r.register(ComponentCategory::Input, Arc::new(Echo("Alpha")), None)
        .unwrap();
    r.register(ComponentCategory::Display, Arc::new(Echo("Zeta")), None)
        .unwrap();

    let all = ComponentResolver::new(Arc::clone(&r));
    assert_eq!(all.get_allowed(), vec!["Alpha", "Known", "Zeta"]);

    let some = ComponentResolver::new(r)
        .with_allowed_components(&["Zeta".to_string(), "Known".to_string()])
        .unwrap();
    assert_eq!(some.get_allowed(), vec!["Known", "Zeta"]);
}

#[test]
fn registries_are_isolated_instances() {
    let a = ComponentRegistry::new();
    let b = ComponentRegistry::new();
    a.register(ComponentCategory::Custom, Arc::new(Echo("OnlyA")), None)
        .unwrap();
    assert!(a.contains("OnlyA"));
    assert!(!b.contains("OnlyA"));
    assert!(a.unregister("OnlyA"));
    assert!(a.is_empty());
}

#[test]
fn blank_names_are_rejected() {
    let r = ComponentRegistry::new();
    assert!(r
        .register(ComponentCategory::Custom, Arc::new(Echo("  ")), None)
        .is_err());
}

#[test]
fn prop_schema_reports_first_missing_prop() {
    let schema = PropSchema::required(["value", "labels"]);
    assert_eq!(schema.missing(&json!({"value": []})), Some("labels"));
    assert_eq!(schema.missing(&json!({"value": [], "labels": []})), None);
}

#[tokio::test]
async fn lazy_component_resolves_like_eager_and_loads_once() {
    let loads = Arc::new(AtomicUsize::new(0));
    let r = Arc::new(ComponentRegistry::new());
    r.register_lazy(
        "Lazy",
        ComponentCategory::Annotation,
        Arc::new(CountingLoader {
            loads: Arc::clone(&loads),
            fail: false,
        }),
        None,
    )
    .unwrap();

    let resolver = ComponentResolver::new(r);
    // Not yet loaded, still a successful resolution.
    let handle = resolver.resolve("Lazy").expect("deferred handle");
    assert!(!handle.is_loaded());
    assert!(handle.get().is_none());

    let c = handle.load().await.unwrap();
    assert_eq!(c.name(), "Lazy");

    let again = resolver.resolve("Lazy").unwrap();
    assert!(again.is_loaded());
    again.load().await.unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lazy_loader_failure_surfaces_at_load_time() {
    let r = Arc::new(ComponentRegistry::new());
    r.register_lazy(
        "Broken",
        ComponentCategory::Annotation,
        Arc::new(CountingLoader {
            loads: Arc::new(AtomicUsize::new(0)),
            fail: true,
        }),
        None,
    )
    .unwrap();

    let handle = ComponentResolver::new(r).resolve("Broken").unwrap();
    let err = handle.load().await.err().expect("load fails");
    assert!(matches!(err, LayoutError::Internal(_)));
}

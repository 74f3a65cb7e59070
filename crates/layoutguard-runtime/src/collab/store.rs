//! Output store: field-level access to a shared document plus the network
//! status signals a UI binds to.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use layoutguard_core::error::Result;
use layoutguard_core::protocol::sync::{Clock, FieldUpdate};

use super::doc::{CrdtMap, ObserverId, Origin, UpdateObserver};

pub type FieldCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// `connected` and `synced` are independent: a replica can be connected and
/// still waiting for its first state reconciliation.
#[derive(Debug, Default)]
pub struct SyncStatus {
    connected: AtomicBool,
    synced: AtomicBool,
    pending: AtomicUsize,
}

impl SyncStatus {
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Local updates not yet acknowledged by the relay.
    pub fn pending_changes(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn set_connected(&self, v: bool) {
        self.connected.store(v, Ordering::Release);
    }

    pub(crate) fn set_synced(&self, v: bool) {
        self.synced.store(v, Ordering::Release);
    }

    pub(crate) fn set_pending(&self, n: usize) {
        self.pending.store(n, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct OutputStore {
    doc: Arc<dyn CrdtMap>,
    status: Arc<SyncStatus>,
}

impl OutputStore {
    pub fn new(doc: Arc<dyn CrdtMap>) -> Self {
        Self {
            doc,
            status: Arc::new(SyncStatus::default()),
        }
    }

    pub fn doc(&self) -> &Arc<dyn CrdtMap> {
        &self.doc
    }

    pub fn status(&self) -> &Arc<SyncStatus> {
        &self.status
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.doc.get(field)
    }

    pub fn set(&self, field: &str, value: Value) -> Result<FieldUpdate> {
        self.doc.set(field, value)
    }

    /// Current document as a JSON object (the `output` context root).
    pub fn snapshot_object(&self) -> Value {
        let map: Map<String, Value> = self
            .doc
            .snapshot()
            .into_iter()
            .map(|u| (u.field, u.value))
            .collect();
        Value::Object(map)
    }

    /// Deliver the current value (or `default`) now, then every change.
    ///
    /// Deliveries are ordered by clock: a value older than one already
    /// delivered is skipped, so a write racing the initial read is never
    /// followed by the stale initial value.
    pub fn subscribe(&self, field: &str, default: Value, callback: FieldCallback) -> Subscription {
        let last: Arc<Mutex<Option<Clock>>> = Arc::default();

        let gate = Arc::clone(&last);
        let cb = Arc::clone(&callback);
        let observer: UpdateObserver = Arc::new(move |u: &FieldUpdate, _origin: Origin| {
            if advance(&gate, Some(&u.clock)) {
                cb(&u.value);
            }
        });
        let id = self.doc.observe(Some(field), observer);

        match self.doc.entry(field) {
            Some(u) => {
                if advance(&last, Some(&u.clock)) {
                    callback(&u.value);
                }
            }
            None => {
                if advance(&last, None) {
                    callback(&default);
                }
            }
        }

        Subscription::new(Arc::clone(&self.doc), id)
    }

    /// Every change to every field, with its origin.
    pub fn observe_all(&self, observer: UpdateObserver) -> Subscription {
        let id = self.doc.observe(None, observer);
        Subscription::new(Arc::clone(&self.doc), id)
    }

    /// Live view of one field with a default for when it is unset.
    pub fn use_output_field(&self, field: &str, default: Value) -> OutputField {
        let slot = Arc::new(Mutex::new(FieldSlot {
            clock: None,
            value: default,
        }));

        let writer = Arc::clone(&slot);
        let observer: UpdateObserver = Arc::new(move |u: &FieldUpdate, _origin: Origin| {
            if let Ok(mut s) = writer.lock() {
                s.offer(u);
            }
        });
        let id = self.doc.observe(Some(field), observer);

        if let Some(u) = self.doc.entry(field) {
            if let Ok(mut s) = slot.lock() {
                s.offer(&u);
            }
        }

        OutputField {
            store: self.clone(),
            field: field.to_string(),
            slot,
            subscription: Subscription::new(Arc::clone(&self.doc), id),
        }
    }

    pub fn connected(&self) -> bool {
        self.status.connected()
    }

    pub fn synced(&self) -> bool {
        self.status.synced()
    }

    pub fn pending_changes(&self) -> usize {
        self.status.pending_changes()
    }
}

/// Observer registration. Unsubscribing is synchronous and idempotent;
/// dropping unsubscribes.
pub struct Subscription {
    doc: Arc<dyn CrdtMap>,
    id: ObserverId,
    active: AtomicBool,
}

impl Subscription {
    fn new(doc: Arc<dyn CrdtMap>, id: ObserverId) -> Self {
        Self {
            doc,
            id,
            active: AtomicBool::new(true),
        }
    }

    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.doc.unobserve(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// Last value seen for one field and the clock it was written at; `None`
// while the default is showing.
struct FieldSlot {
    clock: Option<Clock>,
    value: Value,
}

impl FieldSlot {
    fn offer(&mut self, u: &FieldUpdate) {
        if self.clock.as_ref().map_or(true, |c| u.clock > *c) {
            self.clock = Some(u.clock.clone());
            self.value = u.value.clone();
        }
    }
}

/// True (and records `clock`) unless something newer was already delivered.
/// `None` is the unset default, older than any write.
fn advance(last: &Mutex<Option<Clock>>, clock: Option<&Clock>) -> bool {
    let Ok(mut last) = last.lock() else {
        return false;
    };
    let Some(c) = clock else {
        return last.is_none();
    };
    if last.as_ref().is_some_and(|prev| c <= prev) {
        return false;
    }
    *last = Some(c.clone());
    true
}

pub struct OutputField {
    store: OutputStore,
    field: String,
    slot: Arc<Mutex<FieldSlot>>,
    subscription: Subscription,
}

impl OutputField {
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn get(&self) -> Value {
        self.slot
            .lock()
            .map(|s| s.value.clone())
            .unwrap_or(Value::Null)
    }

    pub fn set(&self, value: Value) -> Result<()> {
        self.store.set(&self.field, value).map(|_| ())
    }

    pub fn unsubscribe(&self) {
        self.subscription.unsubscribe();
    }
}

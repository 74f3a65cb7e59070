//! Field-addressable CRDT map.
//!
//! `LwwDoc` is a last-writer-wins map: each field keeps the write with the
//! greatest Lamport clock. Merge is commutative and idempotent, so replicas
//! converge regardless of delivery order or duplication.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde_json::Value;

use layoutguard_core::error::{LayoutError, Result};
use layoutguard_core::protocol::sync::{Clock, FieldUpdate};

/// Where a change came from, as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Written through this replica's `set`.
    Local,
    /// Merged from another replica.
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub type UpdateObserver = Arc<dyn Fn(&FieldUpdate, Origin) + Send + Sync>;

/// Minimal shared-map surface the store and sync layers depend on.
pub trait CrdtMap: Send + Sync {
    fn replica_id(&self) -> &str;

    fn get(&self, field: &str) -> Option<Value>;

    /// Winning write for `field`, clock included.
    fn entry(&self, field: &str) -> Option<FieldUpdate>;

    /// Local write. Returns the update to replicate; fails once the clock
    /// cannot advance.
    fn set(&self, field: &str, value: Value) -> Result<FieldUpdate>;

    /// Merge a remote write. `false` if it lost to (or duplicates) what we have.
    fn apply_update(&self, update: FieldUpdate) -> bool;

    /// Winning write per field, ordered by field name.
    fn snapshot(&self) -> Vec<FieldUpdate>;

    /// `field = None` observes every field.
    fn observe(&self, field: Option<&str>, observer: UpdateObserver) -> ObserverId;

    fn unobserve(&self, id: ObserverId) -> bool;
}

struct DocState {
    entries: BTreeMap<String, FieldUpdate>,
    counter: u64,
}

struct ObserverEntry {
    field: Option<String>,
    callback: UpdateObserver,
}

pub struct LwwDoc {
    replica: String,
    state: Mutex<DocState>,
    observers: DashMap<ObserverId, ObserverEntry>,
    seq: AtomicU64,
}

impl LwwDoc {
    pub fn new(replica: impl Into<String>) -> Self {
        Self {
            replica: replica.into(),
            state: Mutex::new(DocState {
                entries: BTreeMap::new(),
                counter: 0,
            }),
            observers: DashMap::new(),
            seq: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest Lamport counter this replica has produced or merged.
    pub fn clock(&self) -> u64 {
        self.state.lock().map(|s| s.counter).unwrap_or(0)
    }

    // Callbacks run with no lock held; they may read or write the doc.
    fn notify(&self, update: &FieldUpdate, origin: Origin) {
        let targets: Vec<UpdateObserver> = self
            .observers
            .iter()
            .filter(|e| {
                e.value()
                    .field
                    .as_deref()
                    .map_or(true, |f| f == update.field)
            })
            .map(|e| Arc::clone(&e.value().callback))
            .collect();
        for cb in targets {
            cb(update, origin);
        }
    }
}

impl CrdtMap for LwwDoc {
    fn replica_id(&self) -> &str {
        &self.replica
    }

    fn get(&self, field: &str) -> Option<Value> {
        let st = self.state.lock().ok()?;
        st.entries.get(field).map(|u| u.value.clone())
    }

    fn entry(&self, field: &str) -> Option<FieldUpdate> {
        let st = self.state.lock().ok()?;
        st.entries.get(field).cloned()
    }

    fn set(&self, field: &str, value: Value) -> Result<FieldUpdate> {
        let update = {
            let mut st = self
                .state
                .lock()
                .map_err(|_| LayoutError::Internal("document state poisoned".into()))?;
            let counter = st.counter.checked_add(1).ok_or_else(|| {
                LayoutError::ResourceExceeded(format!("clock of replica {} exhausted", self.replica))
            })?;
            st.counter = counter;
            let update = FieldUpdate {
                field: field.to_string(),
                value,
                clock: Clock::new(counter, self.replica.clone()),
            };
            st.entries.insert(field.to_string(), update.clone());
            update
        };
        self.notify(&update, Origin::Local);
        Ok(update)
    }

    fn apply_update(&self, update: FieldUpdate) -> bool {
        {
            let Ok(mut st) = self.state.lock() else {
                return false;
            };
            st.counter = st.counter.max(update.clock.counter);
            if let Some(cur) = st.entries.get(&update.field) {
                if cur.clock >= update.clock {
                    return false;
                }
            }
            st.entries.insert(update.field.clone(), update.clone());
        }
        self.notify(&update, Origin::Remote);
        true
    }

    fn snapshot(&self) -> Vec<FieldUpdate> {
        self.state
            .lock()
            .map(|st| st.entries.values().cloned().collect())
            .unwrap_or_default()
    }

    fn observe(&self, field: Option<&str>, observer: UpdateObserver) -> ObserverId {
        let id = ObserverId(self.seq.fetch_add(1, Ordering::Relaxed));
        self.observers.insert(
            id,
            ObserverEntry {
                field: field.map(str::to_string),
                callback: observer,
            },
        );
        id
    }

    fn unobserve(&self, id: ObserverId) -> bool {
        self.observers.remove(&id).is_some()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn concurrent_writes_converge_in_any_order() {
        let a = LwwDoc::new("a");
        let b = LwwDoc::new("b");
        let ua = a.set("score", json!(1)).unwrap();
        let ub = b.set("score", json!(2)).unwrap();

        // Same counter, replica id breaks the tie: "b" wins everywhere.
        assert!(a.apply_update(ub.clone()));
        assert!(!b.apply_update(ua.clone()));
        assert_eq!(a.get("score"), Some(json!(2)));
        assert_eq!(b.get("score"), Some(json!(2)));
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn duplicate_update_is_ignored() {
        let a = LwwDoc::new("a");
        let b = LwwDoc::new("b");
        let u = a.set("label", json!("x")).unwrap();
        assert!(b.apply_update(u.clone()));
        assert!(!b.apply_update(u));
    }

    #[test]
    fn later_local_write_beats_merged_one() {
        let a = LwwDoc::new("a");
        let b = LwwDoc::new("b");
        for i in 0..5 {
            a.set("n", json!(i)).unwrap();
        }
        b.apply_update(a.snapshot().remove(0));
        // b's counter advanced past a's, so its write wins on both sides.
        let ub = b.set("n", json!("b")).unwrap();
        assert!(a.apply_update(ub));
        assert_eq!(a.get("n"), Some(json!("b")));
    }

    #[test]
    fn exhausted_clock_is_an_error_not_a_panic() {
        let a = LwwDoc::new("a");
        a.apply_update(FieldUpdate {
            field: "f".into(),
            value: json!(1),
            clock: Clock::new(u64::MAX, "z"),
        });
        assert_eq!(a.clock(), u64::MAX);
        let err = a.set("f", json!(2)).unwrap_err();
        assert!(matches!(err, LayoutError::ResourceExceeded(_)), "{err:?}");
        assert_eq!(a.get("f"), Some(json!(1)));
    }
}

//! Client-side sync provider: binds an `OutputStore` to a relay link.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use layoutguard_core::error::{LayoutError, Result};
use layoutguard_core::protocol::sync::{FieldUpdate, SyncMessage};

use super::doc::{Origin, UpdateObserver};
use super::store::{OutputStore, Subscription};

/// Bidirectional message link to a relay, seen from the client.
pub struct SyncLink {
    pub tx: mpsc::UnboundedSender<SyncMessage>,
    pub rx: mpsc::UnboundedReceiver<SyncMessage>,
}

struct ProviderState {
    next_seq: u64,
    pending: BTreeMap<u64, FieldUpdate>,
    link: Option<mpsc::UnboundedSender<SyncMessage>>,
}

struct ProviderInner {
    store: OutputStore,
    doc: String,
    client: String,
    state: Mutex<ProviderState>,
    peers: DashMap<String, Value>,
}

pub struct SyncProvider {
    inner: Arc<ProviderInner>,
    reader: Mutex<Option<JoinHandle<()>>>,
    observer: Subscription,
}

impl SyncProvider {
    /// Start tracking local writes. Nothing is sent until a link is attached.
    pub fn new(store: OutputStore, doc: impl Into<String>, client: impl Into<String>) -> Self {
        let inner = Arc::new(ProviderInner {
            store: store.clone(),
            doc: doc.into(),
            client: client.into(),
            state: Mutex::new(ProviderState {
                next_seq: 1,
                pending: BTreeMap::new(),
                link: None,
            }),
            peers: DashMap::new(),
        });

        // Weak: the document owns this observer, and the provider owns the store.
        let weak: Weak<ProviderInner> = Arc::downgrade(&inner);
        let observer: UpdateObserver = Arc::new(move |u: &FieldUpdate, origin: Origin| {
            if origin != Origin::Local {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                inner.queue_local(u.clone());
            }
        });
        let observer = store.observe_all(observer);

        Self {
            inner,
            reader: Mutex::new(None),
            observer,
        }
    }

    /// `new` followed by `attach`.
    pub fn connect(
        store: OutputStore,
        doc: impl Into<String>,
        client: impl Into<String>,
        link: SyncLink,
    ) -> Result<Self> {
        let provider = Self::new(store, doc, client);
        provider.attach(link)?;
        Ok(provider)
    }

    /// Bring a link up: announce, re-send everything still pending, start
    /// reading. Replaces any previous link.
    pub fn attach(&self, link: SyncLink) -> Result<()> {
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|_| LayoutError::Internal("sync provider needs a tokio runtime".into()))?;
        self.detach();

        let SyncLink { tx, mut rx } = link;
        {
            let mut st = self
                .inner
                .state
                .lock()
                .map_err(|_| LayoutError::Internal("provider state poisoned".into()))?;

            tx.send(SyncMessage::Hello {
                doc: self.inner.doc.clone(),
                client: self.inner.client.clone(),
            })
            .map_err(|_| LayoutError::Transport("sync link closed".into()))?;

            for (seq, update) in &st.pending {
                let _ = tx.send(SyncMessage::Update {
                    doc: self.inner.doc.clone(),
                    seq: *seq,
                    update: update.clone(),
                });
            }
            st.link = Some(tx);
        }

        let status = self.inner.store.status();
        status.set_synced(false);
        status.set_connected(true);

        let inner = Arc::clone(&self.inner);
        let reader = rt.spawn(async move {
            while let Some(msg) = rx.recv().await {
                inner.handle(msg);
            }
            inner.link_down();
        });
        if let Ok(mut r) = self.reader.lock() {
            *r = Some(reader);
        }
        tracing::debug!(doc = %self.inner.doc, client = %self.inner.client, "sync link up");
        Ok(())
    }

    /// Drop the link. Local writes keep accumulating as pending.
    pub fn detach(&self) {
        if let Ok(mut r) = self.reader.lock() {
            if let Some(handle) = r.take() {
                handle.abort();
            }
        }
        self.inner.link_down();
    }

    /// Publish (or with `None`, clear) this client's presence.
    pub fn set_awareness(&self, state: Option<Value>) -> Result<()> {
        self.inner.send(SyncMessage::Awareness {
            doc: self.inner.doc.clone(),
            client: self.inner.client.clone(),
            state,
        })
    }

    /// Presence of other clients on this document, sorted by client id.
    pub fn peers(&self) -> Vec<(String, Value)> {
        let mut out: Vec<(String, Value)> = self
            .inner
            .peers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn store(&self) -> &OutputStore {
        &self.inner.store
    }
}

impl Drop for SyncProvider {
    fn drop(&mut self) {
        self.observer.unsubscribe();
        self.detach();
    }
}

impl ProviderInner {
    fn queue_local(&self, update: FieldUpdate) {
        let Ok(mut st) = self.state.lock() else {
            return;
        };
        let seq = st.next_seq;
        st.next_seq += 1;
        st.pending.insert(seq, update.clone());
        self.store.status().set_pending(st.pending.len());

        if let Some(link) = &st.link {
            let sent = link.send(SyncMessage::Update {
                doc: self.doc.clone(),
                seq,
                update,
            });
            if sent.is_err() {
                tracing::debug!(doc = %self.doc, seq, "link gone; update stays pending");
            }
        }
    }

    fn send(&self, msg: SyncMessage) -> Result<()> {
        let st = self
            .state
            .lock()
            .map_err(|_| LayoutError::Internal("provider state poisoned".into()))?;
        let link = st
            .link
            .as_ref()
            .ok_or_else(|| LayoutError::Transport("not connected".into()))?;
        link.send(msg)
            .map_err(|_| LayoutError::Transport("sync link closed".into()))
    }

    fn handle(&self, msg: SyncMessage) {
        match msg {
            SyncMessage::SyncState { updates, .. } => {
                for u in updates {
                    self.store.doc().apply_update(u);
                }
                self.store.status().set_synced(true);
            }
            SyncMessage::Update { update, .. } => {
                self.store.doc().apply_update(update);
            }
            SyncMessage::Ack { seq, .. } => {
                if let Ok(mut st) = self.state.lock() {
                    st.pending.remove(&seq);
                    self.store.status().set_pending(st.pending.len());
                }
            }
            SyncMessage::Awareness { client, state, .. } => match state {
                Some(s) => {
                    self.peers.insert(client, s);
                }
                None => {
                    self.peers.remove(&client);
                }
            },
            SyncMessage::Error { code, msg } => {
                tracing::warn!(doc = %self.doc, code = %code, msg = %msg, "relay reported an error");
            }
            SyncMessage::Hello { .. } => {
                tracing::debug!(doc = %self.doc, "ignoring hello from relay");
            }
        }
    }

    fn link_down(&self) {
        if let Ok(mut st) = self.state.lock() {
            st.link = None;
        }
        self.peers.clear();
        let status = self.store.status();
        status.set_connected(false);
        status.set_synced(false);
    }
}

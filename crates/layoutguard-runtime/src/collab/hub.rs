//! Collaboration relay core: one authoritative replica per document plus the
//! peers attached to it.
//!
//! Delivery to peers is `try_send` on a bounded queue. A peer whose queue is
//! full is disconnected; it resynchronises from `sync_state` on reconnect.
//!
//! Each connection writes as exactly one replica (bound by its first update)
//! and may not run its clock more than [`MAX_CLOCK_SKEW`] ahead of the relay.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;

use layoutguard_core::error::{ClientCode, LayoutError, Result};
use layoutguard_core::protocol::sync::{Clock, FieldUpdate, SyncMessage};

use crate::policy::SecurityPolicy;

use super::awareness::Awareness;
use super::doc::{CrdtMap, LwwDoc};
use super::provider::SyncLink;

/// Per-peer outbound queue depth.
pub const PEER_QUEUE: usize = 1024;

/// How far past the relay's own Lamport counter an incoming clock may be.
pub const MAX_CLOCK_SKEW: u64 = 1 << 20;

const RELAY_REPLICA: &str = "relay";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(u64);

struct Peer {
    doc: String,
    client: String,
    replica: Option<String>,
    tx: mpsc::Sender<SyncMessage>,
}

struct DocRoom {
    replica: LwwDoc,
    peers: DashSet<PeerId>,
}

pub struct CollabHub {
    policy: Arc<SecurityPolicy>,
    docs: DashMap<String, Arc<DocRoom>>,
    peers: DashMap<PeerId, Peer>,
    awareness: Awareness,
    seq: AtomicU64,
}

impl CollabHub {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        Self {
            policy,
            docs: DashMap::new(),
            peers: DashMap::new(),
            awareness: Awareness::new(),
            seq: AtomicU64::new(1),
        }
    }

    pub fn connect(
        &self,
        doc: &str,
        client: &str,
    ) -> Result<(PeerId, mpsc::Receiver<SyncMessage>)> {
        if doc.trim().is_empty() {
            return Err(LayoutError::BadRequest("doc id must not be blank".into()));
        }
        if client.trim().is_empty() {
            return Err(LayoutError::BadRequest("client id must not be blank".into()));
        }

        let id = PeerId(self.seq.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(PEER_QUEUE);

        let room = self.room(doc);
        room.peers.insert(id);
        self.peers.insert(
            id,
            Peer {
                doc: doc.to_string(),
                client: client.to_string(),
                replica: None,
                tx,
            },
        );
        tracing::info!(doc = %doc, client = %client, peers = room.peers.len(), "peer connected");
        Ok((id, rx))
    }

    /// Handle one inbound message from `peer`.
    pub fn handle(&self, peer: PeerId, msg: SyncMessage) {
        let Some((doc, client)) = self
            .peers
            .get(&peer)
            .map(|p| (p.doc.clone(), p.client.clone()))
        else {
            return;
        };

        if let Some(target) = msg.doc() {
            if target != doc {
                self.reply_error(peer, ClientCode::BadRequest, "message targets another doc");
                return;
            }
        }

        let room = self.room(&doc);
        match msg {
            SyncMessage::Hello { .. } => {
                self.send(
                    peer,
                    SyncMessage::SyncState {
                        doc: doc.clone(),
                        updates: room.replica.snapshot(),
                    },
                );
                for (other, state) in self.awareness.states(&doc) {
                    if other != client {
                        self.send(
                            peer,
                            SyncMessage::Awareness {
                                doc: doc.clone(),
                                client: other,
                                state: Some(state),
                            },
                        );
                    }
                }
            }
            SyncMessage::Update { seq, update, .. } => {
                // Rejected writes are still acked so the replica stops
                // re-sending them; they are never merged or forwarded.
                if let Err(reason) = self.check_clock(peer, &room, &update.clock) {
                    tracing::warn!(
                        doc = %doc,
                        client = %client,
                        counter = update.clock.counter,
                        reason,
                        "update clock rejected"
                    );
                    self.reply_error(peer, ClientCode::BadRequest, reason);
                    self.send(peer, SyncMessage::Ack { doc, seq });
                    return;
                }
                if !self.policy.validate_expression(&format!("output.{}", update.field)) {
                    self.reply_error(peer, ClientCode::PolicyViolation, "field not writable");
                    self.send(peer, SyncMessage::Ack { doc, seq });
                    return;
                }
                let fresh = room.replica.apply_update(update.clone());
                self.send(peer, SyncMessage::Ack { doc: doc.clone(), seq });
                if fresh {
                    self.broadcast(&room, peer, |d| SyncMessage::Update {
                        doc: d.to_string(),
                        seq: 0,
                        update: update.clone(),
                    });
                }
            }
            SyncMessage::Awareness { state, .. } => {
                // The connection's identity wins over whatever the frame claims.
                self.awareness.apply(&doc, &client, state.clone());
                self.broadcast(&room, peer, |d| SyncMessage::Awareness {
                    doc: d.to_string(),
                    client: client.clone(),
                    state: state.clone(),
                });
            }
            SyncMessage::SyncState { .. } | SyncMessage::Ack { .. } | SyncMessage::Error { .. } => {
                self.reply_error(peer, ClientCode::BadRequest, "unexpected message type");
            }
        }
    }

    pub fn disconnect(&self, peer: PeerId) {
        let Some((_, p)) = self.peers.remove(&peer) else {
            return;
        };
        let room = self.room(&p.doc);
        room.peers.remove(&peer);

        if self.awareness.leave(&p.doc, &p.client) {
            self.broadcast(&room, peer, |d| SyncMessage::Awareness {
                doc: d.to_string(),
                client: p.client.clone(),
                state: None,
            });
        }
        tracing::info!(doc = %p.doc, client = %p.client, "peer disconnected");
    }

    /// In-process link to `doc`, pumped by a spawned task until either side
    /// closes. Must be called within a tokio runtime.
    pub fn open_link(self: &Arc<Self>, doc: &str, client: &str) -> Result<SyncLink> {
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|_| LayoutError::Internal("open_link needs a tokio runtime".into()))?;
        let (peer, mut from_hub) = self.connect(doc, client)?;

        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, mut to_hub) = mpsc::unbounded_channel();

        let hub = Arc::clone(self);
        rt.spawn(async move {
            loop {
                tokio::select! {
                    out = from_hub.recv() => {
                        let Some(m) = out else { break; };
                        if to_client.send(m).is_err() {
                            break;
                        }
                    }
                    inc = to_hub.recv() => {
                        let Some(m) = inc else { break; };
                        hub.handle(peer, m);
                    }
                }
            }
            hub.disconnect(peer);
        });

        Ok(SyncLink {
            tx: client_tx,
            rx: client_rx,
        })
    }

    /// Authoritative state of `doc`, if it was ever opened.
    pub fn snapshot(&self, doc: &str) -> Option<Vec<FieldUpdate>> {
        self.docs.get(doc).map(|r| r.replica.snapshot())
    }

    pub fn peer_count(&self, doc: &str) -> usize {
        self.docs.get(doc).map(|r| r.peers.len()).unwrap_or(0)
    }

    pub fn awareness(&self) -> &Awareness {
        &self.awareness
    }

    fn room(&self, doc: &str) -> Arc<DocRoom> {
        let entry = self.docs.entry(doc.to_string()).or_insert_with(|| {
            Arc::new(DocRoom {
                replica: LwwDoc::new(RELAY_REPLICA),
                peers: DashSet::new(),
            })
        });
        Arc::clone(entry.value())
    }

    fn check_clock(
        &self,
        peer: PeerId,
        room: &DocRoom,
        clock: &Clock,
    ) -> std::result::Result<(), &'static str> {
        if clock.replica.is_empty() || clock.replica == RELAY_REPLICA {
            return Err("replica id not allowed");
        }
        if clock.counter > room.replica.clock().saturating_add(MAX_CLOCK_SKEW) {
            return Err("clock too far ahead");
        }

        let Some(mut p) = self.peers.get_mut(&peer) else {
            return Err("unknown peer");
        };
        if let Some(bound) = &p.replica {
            return if *bound == clock.replica {
                Ok(())
            } else {
                Err("replica does not match this connection")
            };
        }
        p.replica = Some(clock.replica.clone());
        Ok(())
    }

    fn reply_error(&self, peer: PeerId, code: ClientCode, msg: &str) {
        self.send(
            peer,
            SyncMessage::Error {
                code: code.as_str().to_string(),
                msg: msg.to_string(),
            },
        );
    }

    fn send(&self, peer: PeerId, msg: SyncMessage) {
        let full = match self.peers.get(&peer) {
            Some(p) => matches!(p.tx.try_send(msg), Err(mpsc::error::TrySendError::Full(_))),
            None => false,
        };
        if full {
            tracing::warn!(peer = peer.0, "peer queue full; disconnecting");
            self.disconnect(peer);
        }
    }

    fn broadcast<F>(&self, room: &DocRoom, except: PeerId, make: F)
    where
        F: Fn(&str) -> SyncMessage,
    {
        let targets: Vec<(PeerId, String)> = room
            .peers
            .iter()
            .filter(|p| *p.key() != except)
            .filter_map(|p| self.peers.get(p.key()).map(|peer| (*p.key(), peer.doc.clone())))
            .collect();
        for (id, doc) in targets {
            self.send(id, make(&doc));
        }
    }
}

//! Collaborative output store: a field-addressable CRDT map, presence, and
//! the relay/provider pair that keeps replicas of one task converging.

pub mod awareness;
pub mod doc;
pub mod hub;
pub mod provider;
pub mod store;

pub use awareness::Awareness;
pub use doc::{CrdtMap, LwwDoc, ObserverId, Origin, UpdateObserver};
pub use hub::{CollabHub, PeerId, MAX_CLOCK_SKEW};
pub use provider::{SyncLink, SyncProvider};
pub use store::{FieldCallback, OutputField, OutputStore, Subscription, SyncStatus};

//! Sync protocol vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use layoutguard_core::protocol::sync::{Clock, SyncMessage};

mod vector_loader;
use vector_loader::load;

#[test]
fn sync_vectors() {
    let files = ["sync_update.json", "sync_awareness_leave.json", "sync_missing_doc.json"];

    for f in files {
        let v = load(f);
        let res = SyncMessage::decode(&v.frame.decode());

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert_eq!(e.client_code().as_str(), err.code, "vector={}", v.description);
            continue;
        }

        let msg = res.expect("expected ok message");
        let ex = v.expect.expect("missing expect block");
        assert_eq!(msg.doc(), ex["doc"].as_str(), "vector={}", v.description);

        match (&msg, ex["kind"].as_str().unwrap()) {
            (SyncMessage::Update { seq, update, .. }, "update") => {
                assert_eq!(*seq, ex["seq"].as_u64().unwrap());
                assert_eq!(update.clock, Clock::new(7, "r-a"));
            }
            (SyncMessage::Awareness { state, .. }, "awareness") => {
                assert!(state.is_none(), "vector={}", v.description);
            }
            (other, kind) => panic!("vector={} expected {kind}, got {other:?}", v.description),
        }
    }
}

#[test]
fn clock_orders_by_counter_then_replica() {
    assert!(Clock::new(2, "a") > Clock::new(1, "z"));
    assert!(Clock::new(1, "b") > Clock::new(1, "a"));
    assert_eq!(Clock::new(3, "a"), Clock::new(3, "a"));
}

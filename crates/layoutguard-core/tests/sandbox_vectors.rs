//! Sandbox channel vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use serde_json::json;

use layoutguard_core::protocol::sandbox::{MessageKind, SandboxMessage};

mod vector_loader;
use vector_loader::load;

#[test]
fn sandbox_vectors() {
    let files = [
        "sandbox_ready.json",
        "sandbox_render.json",
        "sandbox_output_change.json",
        "sandbox_update_context.json",
        "sandbox_unknown_type.json",
        "sandbox_extra_field.json",
        "sandbox_lowercase_tag.json",
        "sandbox_not_json.json",
    ];

    for f in files {
        let v = load(f);
        let res = SandboxMessage::decode(&v.frame.decode());

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert_eq!(e.client_code().as_str(), err.code, "vector={}", v.description);
            continue;
        }

        let msg = res.expect("expected ok message");
        let ex = v.expect.expect("missing expect block");
        assert_eq!(msg.kind().as_str(), ex["kind"].as_str().unwrap(), "vector={}", v.description);

        if let SandboxMessage::OutputChange { field, value } = &msg {
            assert_eq!(field, ex["field"].as_str().unwrap(), "vector={}", v.description);
            assert_eq!(value, &ex["value"], "vector={}", v.description);
        }
    }
}

#[test]
fn encoded_tags_match_wire_contract() {
    let cases = [
        (SandboxMessage::Ready, "READY"),
        (
            SandboxMessage::Render { html: "<p></p>".into(), context: json!({}) },
            "RENDER",
        ),
        (SandboxMessage::Rendered, "RENDERED"),
        (
            SandboxMessage::UpdateContext { path: "output.a".into(), value: json!(1) },
            "UPDATE_CONTEXT",
        ),
        (
            SandboxMessage::OutputChange { field: "a".into(), value: json!(1) },
            "OUTPUT_CHANGE",
        ),
        (SandboxMessage::Error { error: "boom".into() }, "ERROR"),
    ];

    for (msg, tag) in cases {
        let raw = msg.encode().unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["type"], tag);
        assert_eq!(msg.kind().as_str(), tag);
    }
}

#[test]
fn error_payload_field_is_named_error() {
    let raw = SandboxMessage::Error { error: "guest crashed".into() }.encode().unwrap();
    let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(v, json!({"type": "ERROR", "error": "guest crashed"}));
}

#[test]
fn host_bound_kinds() {
    assert!(SandboxMessage::Ready.is_host_bound());
    assert!(SandboxMessage::Rendered.is_host_bound());
    assert!(!SandboxMessage::Render { html: String::new(), context: json!(null) }.is_host_bound());
    assert_eq!(
        SandboxMessage::UpdateContext { path: "a".into(), value: json!(1) }.kind(),
        MessageKind::UpdateContext
    );
}

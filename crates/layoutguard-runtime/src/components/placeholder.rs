//! Placeholder markup shared by the compiler and the hydrating guest.
//!
//! Live placeholder:
//! `<div data-component="NAME" data-props='JSON'></div>`
//!
//! Error block:
//! `<div class="layout-error" data-layout-error="KIND" data-component-name="NAME">MESSAGE</div>`

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use layoutguard_core::error::{LayoutError, Result};

/// Error marker kinds (value of `data-layout-error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    DisallowedComponent,
    UnknownComponent,
    PolicyViolation,
    MissingProp,
    HydrationFailed,
}

impl MarkerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MarkerKind::DisallowedComponent => "disallowed-component",
            MarkerKind::UnknownComponent => "unknown-component",
            MarkerKind::PolicyViolation => "policy-violation",
            MarkerKind::MissingProp => "missing-prop",
            MarkerKind::HydrationFailed => "hydration-failed",
        }
    }
}

pub fn live_placeholder(name: &str, props: &Value) -> Result<String> {
    let json = serde_json::to_string(props)
        .map_err(|e| LayoutError::Internal(format!("props encode failed: {e}")))?;
    Ok(format!(
        "<div data-component=\"{}\" data-props='{}'></div>",
        escape_html(name),
        escape_single_quoted_attr(&json)
    ))
}

pub fn error_block(kind: MarkerKind, name: &str, message: &str) -> String {
    format!(
        "<div class=\"layout-error\" data-layout-error=\"{}\" data-component-name=\"{}\">{}</div>",
        kind.as_str(),
        escape_html(name),
        escape_html(message)
    )
}

pub fn disallowed_block(name: &str) -> String {
    error_block(
        MarkerKind::DisallowedComponent,
        name,
        &format!("Component \"{name}\" is not allowed in this layout"),
    )
}

pub fn unknown_block(name: &str) -> String {
    error_block(
        MarkerKind::UnknownComponent,
        name,
        &format!("Component \"{name}\" is not registered"),
    )
}

/// A live placeholder located in painted markup.
///
/// `props` is `Err` with the decode message when `data-props` is not JSON;
/// the placeholder still occupies its span.
#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    pub span: Range<usize>,
    pub name: String,
    pub props: std::result::Result<Value, String>,
}

fn placeholder_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<div data-component="([^"]*)" data-props='([^']*)'></div>"#).ok()
    })
    .as_ref()
}

/// Find every live placeholder in `html`, in document order.
pub fn find_placeholders(html: &str) -> Result<Vec<Placeholder>> {
    let re = placeholder_re()
        .ok_or_else(|| LayoutError::Internal("placeholder pattern failed to compile".into()))?;

    let mut out = Vec::new();
    for caps in re.captures_iter(html) {
        let (Some(whole), Some(name), Some(props)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let props = serde_json::from_str::<Value>(&unescape_html(props.as_str()))
            .map_err(|e| e.to_string());
        out.push(Placeholder {
            span: whole.range(),
            name: unescape_html(name.as_str()),
            props,
        });
    }
    Ok(out)
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            // Braces never reach the template lexer as markup.
            '{' => out.push_str("&#123;"),
            '}' => out.push_str("&#125;"),
            c => out.push(c),
        }
    }
    out
}

// JSON stays readable: only the characters that could end the attribute or
// start an entity are encoded.
fn escape_single_quoted_attr(s: &str) -> String {
    s.replace('&', "&amp;").replace('\'', "&#39;")
}

fn unescape_html(s: &str) -> String {
    s.replace("&#123;", "{")
        .replace("&#125;", "}")
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

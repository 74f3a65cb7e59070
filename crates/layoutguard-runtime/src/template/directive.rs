//! Source preprocessing run before the template compiler sees a layout.
//!
//! Two rewrites:
//! - `{% component NAME key=value ... %}` becomes either a call to the
//!   placeholder function or a static error block, decided here.
//! - every `{% for %}` tag gets a budget tick as the first statement of its
//!   body.
//!
//! `{% raw %}` sections are copied untouched.

use std::sync::OnceLock;

use regex::Regex;

use layoutguard_core::error::{LayoutError, Result};

use crate::components::placeholder::{disallowed_block, error_block, unknown_block, MarkerKind};
use crate::components::ComponentRegistry;
use crate::policy::SecurityPolicy;

use super::scan::{line_of, scan, TagKind};

/// Name of the placeholder function registered on the environment.
pub(crate) const COMPONENT_FN: &str = "__lg_component";
/// Name of the loop budget function registered on the environment.
pub(crate) const ITER_FN: &str = "__lg_iter";

fn binding_re() -> std::result::Result<&'static Regex, String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\[[0-9]+\])*(\.[A-Za-z_][A-Za-z0-9_]*(\[[0-9]+\])*)*$").ok()
    })
    .as_ref()
    .ok_or_else(|| "binding pattern failed to compile".to_string())
}

pub(crate) struct Preprocessor<'a> {
    policy: &'a SecurityPolicy,
    registry: Option<&'a ComponentRegistry>,
}

impl<'a> Preprocessor<'a> {
    pub(crate) fn new(policy: &'a SecurityPolicy, registry: Option<&'a ComponentRegistry>) -> Self {
        Self { policy, registry }
    }

    pub(crate) fn run(&self, src: &str) -> Result<String> {
        let tags = scan(src)?;

        let mut out = String::with_capacity(src.len() + 64);
        let mut last = 0;
        let mut depth = 0usize;

        for tag in tags.iter().filter(|t| t.kind == TagKind::Block) {
            let (start, end) = (tag.span.start, tag.span.end);
            match tag.keyword() {
                "for" => {
                    depth += 1;
                    if depth > self.policy.max_depth() {
                        return Err(LayoutError::ResourceExceeded(format!(
                            "loop nesting deeper than {} at line {}",
                            self.policy.max_depth(),
                            line_of(src, start)
                        )));
                    }
                    out.push_str(&src[last..end]);
                    out.push_str(&format!("{{% set __lg_tick = {ITER_FN}() {}%}}", tag.trail));
                    last = end;
                }
                "endfor" => depth = depth.saturating_sub(1),
                "component" => {
                    let replacement = self
                        .compile_component(tag.args())
                        .map_err(|message| LayoutError::Syntax {
                            message,
                            line: Some(line_of(src, start)),
                        })?;

                    let before = &src[last..start];
                    match tag.lead {
                        "-" => out.push_str(before.trim_end()),
                        "+" => out.push_str(before),
                        _ => out.push_str(lstrip_line(src, last, start)),
                    }
                    out.push_str(&replacement);

                    last = match tag.trail {
                        "-" => end + leading_ws_len(&src[end..]),
                        "+" => end,
                        _ => end + leading_newline_len(&src[end..]),
                    };
                }
                _ => {}
            }
        }

        out.push_str(&src[last..]);
        Ok(out)
    }

    /// Directive body -> replacement source. `Err` carries a syntax message.
    fn compile_component(&self, args: &str) -> std::result::Result<String, String> {
        let tokens = tokenize(args)?;
        let mut tokens = tokens.into_iter();

        let raw_name = tokens
            .next()
            .ok_or_else(|| "component directive requires a name".to_string())?;
        let name = unquote(&raw_name).unwrap_or(raw_name.as_str()).to_string();
        if !is_component_name(&name) {
            return Err(format!("invalid component name: {raw_name}"));
        }

        let mut props = Vec::new();
        for tok in tokens {
            let (key, value) = tok
                .split_once('=')
                .ok_or_else(|| format!("expected key=value prop, got {tok}"))?;
            if !crate::config::schema::is_identifier(key) {
                return Err(format!("invalid prop name: {key}"));
            }
            if value.is_empty() {
                return Err(format!("prop {key} has no value"));
            }
            props.push((key.to_string(), classify_prop(value)?));
        }

        if !self.policy.validate_component(&name) {
            return Ok(disallowed_block(&name));
        }
        if let Some(registry) = self.registry {
            if !registry.contains(&name) {
                tracing::warn!(component = %name, "layout references unregistered component");
                return Ok(unknown_block(&name));
            }
        }

        let mut entries = Vec::with_capacity(props.len());
        for (key, value) in props {
            let rendered = match value {
                PropValue::Literal(lit) => lit,
                PropValue::Binding(path) => {
                    if !self.policy.validate_expression(&path) {
                        return Ok(error_block(
                            MarkerKind::PolicyViolation,
                            &name,
                            &format!("Binding \"{path}\" is not permitted"),
                        ));
                    }
                    path
                }
            };
            entries.push(format!("\"{key}\": {rendered}"));
        }

        Ok(format!(
            "{{{{ {COMPONENT_FN}(\"{name}\", {{{}}}) }}}}",
            entries.join(", ")
        ))
    }
}

enum PropValue {
    Literal(String),
    Binding(String),
}

// A literal is one quoted string, a number, a boolean or none; it is
// re-emitted as JSON. Anything else must be a plain binding path.
fn classify_prop(value: &str) -> std::result::Result<PropValue, String> {
    if value.starts_with('"') || value.starts_with('\'') {
        let text = parse_string_literal(value)
            .ok_or_else(|| format!("malformed string literal: {value}"))?;
        let json = serde_json::to_string(&text).map_err(|e| e.to_string())?;
        return Ok(PropValue::Literal(json));
    }
    if is_number(value) {
        return Ok(PropValue::Literal(value.to_string()));
    }
    match value {
        "true" | "True" => Ok(PropValue::Literal("true".into())),
        "false" | "False" => Ok(PropValue::Literal("false".into())),
        "none" | "None" | "null" => Ok(PropValue::Literal("none".into())),
        _ if binding_re()?.is_match(value) => Ok(PropValue::Binding(value.to_string())),
        _ => Err(format!("prop value must be a literal or a binding path: {value}")),
    }
}

/// Decode a single quoted string; `None` unless the closing quote is the
/// last character and no unescaped quote sits inside.
fn parse_string_literal(s: &str) -> Option<String> {
    let mut chars = s.chars();
    let q = chars.next()?;
    if !matches!(q, '"' | '\'') {
        return None;
    }

    let mut out = String::new();
    let mut escaped = false;
    let mut closed = false;
    for c in chars {
        if closed {
            return None;
        }
        if escaped {
            out.push(match c {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '\\' | '"' | '\'' | '/' => c,
                _ => return None,
            });
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == q {
            closed = true;
        } else {
            out.push(c);
        }
    }
    closed.then_some(out)
}

/// Split on whitespace outside quotes.
fn tokenize(args: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in args.chars() {
        if let Some(q) = quote {
            cur.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                cur.push(c);
            }
            c if c.is_whitespace() => {
                if !cur.is_empty() {
                    tokens.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }

    if quote.is_some() {
        return Err("unterminated string in component directive".into());
    }
    if !cur.is_empty() {
        tokens.push(cur);
    }
    Ok(tokens)
}

fn unquote(s: &str) -> Option<&str> {
    let first = s.chars().next()?;
    if (first == '"' || first == '\'') && s.len() >= 2 && s.ends_with(first) {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

fn is_number(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let mut parts = digits.splitn(2, '.');
    let int_ok = parts
        .next()
        .is_some_and(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    let frac_ok = parts
        .next()
        .map_or(true, |p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    int_ok && frac_ok
}

pub(crate) fn is_component_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

// lstrip_blocks: drop indentation when the tag is the first thing on its line.
fn lstrip_line(src: &str, from: usize, tag_start: usize) -> &str {
    let line_start = src[..tag_start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    if line_start >= from && src[line_start..tag_start].chars().all(|c| c == ' ' || c == '\t') {
        &src[from..line_start]
    } else {
        &src[from..tag_start]
    }
}

// trim_blocks: drop the first newline after the tag.
fn leading_newline_len(rest: &str) -> usize {
    if rest.starts_with("\r\n") {
        2
    } else if rest.starts_with('\n') {
        1
    } else {
        0
    }
}

fn leading_ws_len(rest: &str) -> usize {
    rest.len() - rest.trim_start().len()
}

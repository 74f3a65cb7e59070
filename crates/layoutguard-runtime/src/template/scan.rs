//! Tag scanner for layout sources.
//!
//! Locates `{% %}` and `{{ }}` tags the way the template lexer reads them:
//! a closing delimiter only counts outside string literals and outside
//! brackets. Comments and `{% raw %}` sections are skipped.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use layoutguard_core::error::{LayoutError, Result};

/// Identifiers with this prefix belong to the preprocessor.
pub(crate) const RESERVED_PREFIX: &str = "__lg_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagKind {
    Block,
    Expr,
}

#[derive(Debug, Clone)]
pub(crate) struct Tag<'s> {
    pub kind: TagKind,
    /// Whole tag, delimiters included.
    pub span: Range<usize>,
    /// Whitespace control after the opener: `-`, `+` or empty.
    pub lead: &'s str,
    pub body: &'s str,
    /// Whitespace control before the closer.
    pub trail: &'s str,
}

impl<'s> Tag<'s> {
    /// `for` in `{% for x in xs %}`.
    pub fn keyword(&self) -> &'s str {
        let body = self.body.trim_start();
        let end = body
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(body.len());
        &body[..end]
    }

    /// Everything after the keyword.
    pub fn args(&self) -> &'s str {
        let body = self.body.trim_start();
        &body[self.keyword().len()..]
    }
}

fn endraw_re() -> Result<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{%[-+]?\s*endraw\s*[-+]?%\}").ok())
        .as_ref()
        .ok_or_else(|| LayoutError::Internal("endraw pattern failed to compile".into()))
}

/// Every block and expression tag in `src`, in source order.
///
/// Fails on unterminated tags and on identifiers using [`RESERVED_PREFIX`].
pub(crate) fn scan(src: &str) -> Result<Vec<Tag<'_>>> {
    let bytes = src.as_bytes();
    let mut tags = Vec::new();
    let mut i = 0;

    while let Some(off) = src[i..].find('{') {
        let at = i + off;
        let (kind, closer) = match bytes.get(at + 1) {
            Some(b'#') => {
                let end = src[at + 2..]
                    .find("#}")
                    .ok_or_else(|| unterminated(src, at, "comment"))?;
                i = at + 2 + end + 2;
                continue;
            }
            Some(b'%') => (TagKind::Block, "%}"),
            Some(b'{') => (TagKind::Expr, "}}"),
            _ => {
                i = at + 1;
                continue;
            }
        };

        let open_end = at + 2;
        let lead = match bytes.get(open_end) {
            Some(b'-') => "-",
            Some(b'+') => "+",
            _ => "",
        };
        let body_start = open_end + lead.len();
        let (body_end, trail) =
            find_close(bytes, body_start, closer).ok_or_else(|| unterminated(src, at, "tag"))?;
        let end = body_end + trail.len() + closer.len();

        let tag = Tag {
            kind,
            span: at..end,
            lead,
            body: &src[body_start..body_end],
            trail,
        };
        if let Some(name) = reserved_identifier(tag.body) {
            return Err(LayoutError::Syntax {
                message: format!("identifier {name} is reserved"),
                line: Some(line_of(src, at)),
            });
        }

        let raw = kind == TagKind::Block && tag.keyword() == "raw";
        tags.push(tag);
        i = end;

        if raw {
            let m = endraw_re()?
                .find(&src[end..])
                .ok_or_else(|| unterminated(src, at, "raw block"))?;
            i = end + m.end();
        }
    }

    Ok(tags)
}

// Byte offset of the closer (and its whitespace-control marker) at bracket
// depth zero, outside any string literal.
fn find_close(bytes: &[u8], from: usize, closer: &str) -> Option<(usize, &'static str)> {
    let closer = closer.as_bytes();
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    let mut depth = 0usize;
    let mut j = from;

    while j < bytes.len() {
        let b = bytes[j];
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            j += 1;
            continue;
        }

        if depth == 0 {
            if bytes[j..].starts_with(closer) {
                return Some((j, ""));
            }
            if bytes[j + 1..].starts_with(closer) {
                match b {
                    b'-' => return Some((j, "-")),
                    b'+' => return Some((j, "+")),
                    _ => {}
                }
            }
        }

        match b {
            b'"' | b'\'' => quote = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
        j += 1;
    }
    None
}

fn reserved_identifier(body: &str) -> Option<&str> {
    let bytes = body.as_bytes();
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    let mut j = 0;

    while j < bytes.len() {
        let b = bytes[j];
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            j += 1;
            continue;
        }
        if b == b'"' || b == b'\'' {
            quote = Some(b);
            j += 1;
            continue;
        }
        if b.is_ascii_alphabetic() || b == b'_' {
            let start = j;
            while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                j += 1;
            }
            let ident = &body[start..j];
            if ident.starts_with(RESERVED_PREFIX) {
                return Some(ident);
            }
            continue;
        }
        if b.is_ascii_digit() {
            // Numeric literal; `1__lg_x` is not an identifier.
            while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                j += 1;
            }
            continue;
        }
        j += 1;
    }
    None
}

fn unterminated(src: &str, at: usize, what: &str) -> LayoutError {
    LayoutError::Syntax {
        message: format!("unterminated {what}"),
        line: Some(line_of(src, at)),
    }
}

pub(crate) fn line_of(src: &str, offset: usize) -> usize {
    src[..offset].matches('\n').count() + 1
}

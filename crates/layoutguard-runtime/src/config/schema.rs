use std::collections::HashMap;

use regex::Regex;
use serde::Deserialize;
use layoutguard_core::error::{LayoutError, Result};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    pub version: u32,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub security: SecurityConfig,

    /// Dev ticket table for the relay (`ticket -> user id`).
    #[serde(default)]
    pub tickets: HashMap<String, String>,
}

impl LayoutConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(LayoutError::BadRequest(format!(
                "unsupported config version: {}",
                self.version
            )));
        }

        self.server.validate()?;
        self.security.validate()?;

        Ok(())
    }
}

/// Collaboration relay settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            ping_interval_ms: default_ping_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        if !(5000..=120000).contains(&self.ping_interval_ms) {
            return Err(LayoutError::BadRequest(
                "server.ping_interval_ms must be between 5000 and 120000".into(),
            ));
        }
        if !(10000..=600000).contains(&self.idle_timeout_ms) {
            return Err(LayoutError::BadRequest(
                "server.idle_timeout_ms must be between 10000 and 600000".into(),
            ));
        }
        if self.idle_timeout_ms <= self.ping_interval_ms {
            return Err(LayoutError::BadRequest(
                "server.idle_timeout_ms must be greater than ping_interval_ms".into(),
            ));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:8090".into()
}
fn default_ping_interval_ms() -> u64 {
    20000
}
fn default_idle_timeout_ms() -> u64 {
    60000
}

/// Per-render-session security settings, derived from project settings.
///
/// Immutable once a render session starts; compile it into a
/// [`crate::policy::SecurityPolicy`] before use.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    /// Empty means every registered component is permitted.
    #[serde(default)]
    pub allowed_components: Vec<String>,

    #[serde(default = "default_binding_path_pattern")]
    pub binding_path_pattern: String,

    #[serde(default = "default_expression_allowlist")]
    pub expression_allowlist: Vec<String>,

    /// Maximum `for` nesting depth in one template.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Loop-body executions allowed per render call.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_components: Vec::new(),
            binding_path_pattern: default_binding_path_pattern(),
            expression_allowlist: default_expression_allowlist(),
            max_depth: default_max_depth(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl SecurityConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(LayoutError::BadRequest(
                "security.max_iterations must be at least 1".into(),
            ));
        }
        if self.max_depth == 0 {
            return Err(LayoutError::BadRequest(
                "security.max_depth must be at least 1".into(),
            ));
        }
        Regex::new(&self.binding_path_pattern).map_err(|e| {
            LayoutError::BadRequest(format!("security.binding_path_pattern invalid: {e}"))
        })?;
        for root in &self.expression_allowlist {
            if !is_identifier(root) {
                return Err(LayoutError::BadRequest(format!(
                    "security.expression_allowlist entry is not an identifier: {root:?}"
                )));
            }
        }
        Ok(())
    }

    /// Builder-style override used by sessions and tests.
    pub fn with_allowed_components<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_components = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_expression_allowlist<I, S>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expression_allowlist = roots.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_depth(mut self, max: usize) -> Self {
        self.max_depth = max;
        self
    }
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn default_binding_path_pattern() -> String {
    r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$".into()
}
fn default_expression_allowlist() -> Vec<String> {
    ["input", "output", "context", "config", "user"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_max_depth() -> usize {
    10
}
fn default_max_iterations() -> usize {
    1000
}

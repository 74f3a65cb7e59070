use regex::Regex;
use serde_json::{Map, Value};

use layoutguard_core::error::{ClientCode, LayoutError, Result};

use crate::config::schema::SecurityConfig;

use super::allowlist::{ComponentAllowlist, RootAllowlist};

/// Decision from policy evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    Pass,
    Deny { code: ClientCode, reason: &'static str },
}

impl PolicyDecision {
    pub fn is_pass(&self) -> bool {
        matches!(self, PolicyDecision::Pass)
    }
}

/// A dotted binding path with its derived root.
///
/// Value type only: never cached as trusted, always re-validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    path: String,
}

impl Expression {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// First segment (`output` for `output.entities`).
    pub fn root(&self) -> &str {
        self.path.split('.').next().unwrap_or_default()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('.')
    }
}

/// Compiled security policy for one render session.
/// Construct once from [`SecurityConfig`], then share via Arc.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    components: ComponentAllowlist,
    roots: RootAllowlist,
    binding_path: Regex,
    max_depth: usize,
    max_iterations: usize,
}

impl SecurityPolicy {
    pub fn new(cfg: &SecurityConfig) -> Result<Self> {
        cfg.validate()?;
        let binding_path = Regex::new(&cfg.binding_path_pattern).map_err(|e| {
            LayoutError::BadRequest(format!("binding_path_pattern invalid: {e}"))
        })?;

        Ok(Self {
            components: ComponentAllowlist::compile(&cfg.allowed_components)?,
            roots: RootAllowlist::compile(&cfg.expression_allowlist),
            binding_path,
            max_depth: cfg.max_depth,
            max_iterations: cfg.max_iterations,
        })
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Binding expression check. Fails closed and never raises.
    pub fn check_expression(&self, expr: &str) -> PolicyDecision {
        let expr = Expression::new(expr);

        if !self.roots.contains(expr.root()) {
            return PolicyDecision::Deny {
                code: ClientCode::PolicyViolation,
                reason: "root not in expression allowlist",
            };
        }

        if !self.binding_path.is_match(expr.path()) {
            return PolicyDecision::Deny {
                code: ClientCode::PolicyViolation,
                reason: "path does not match binding pattern",
            };
        }

        PolicyDecision::Pass
    }

    pub fn validate_expression(&self, expr: &str) -> bool {
        match self.check_expression(expr) {
            PolicyDecision::Pass => true,
            PolicyDecision::Deny { reason, .. } => {
                tracing::warn!(expression = %expr, reason, "binding expression rejected");
                false
            }
        }
    }

    /// Component name check against `allowed_components`.
    pub fn check_component(&self, name: &str) -> PolicyDecision {
        if self.components.is_allowed(name) {
            PolicyDecision::Pass
        } else {
            PolicyDecision::Deny {
                code: ClientCode::DisallowedComponent,
                reason: "component not in allowlist",
            }
        }
    }

    pub fn validate_component(&self, name: &str) -> bool {
        match self.check_component(name) {
            PolicyDecision::Pass => true,
            PolicyDecision::Deny { reason, .. } => {
                tracing::warn!(component = %name, reason, "component rejected");
                false
            }
        }
    }

    /// Copy only allowlisted top-level keys out of `data`.
    ///
    /// Filtering is shallow: whatever sits under an allowlisted key is passed
    /// through as-is.
    pub fn create_secure_context(&self, data: &Value) -> Value {
        let Some(obj) = data.as_object() else {
            tracing::warn!("render data is not an object; using empty context");
            return Value::Object(Map::new());
        };

        let mut out = Map::new();
        for root in self.roots.roots() {
            if let Some(v) = obj.get(root) {
                out.insert(root.clone(), v.clone());
            }
        }

        let dropped = obj.len() - out.len();
        if dropped > 0 {
            tracing::debug!(dropped, "non-allowlisted context keys removed");
        }
        Value::Object(out)
    }
}

use std::sync::Arc;

use layoutguard_core::error::Result;

use crate::policy::allowlist::ComponentAllowlist;

use super::registry::{ComponentHandle, ComponentRegistry};

/// Telemetry hook invoked with the offending component name.
pub type ComponentCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Outcome of one resolution, in priority order.
#[derive(Clone)]
pub enum Resolution {
    Unknown,
    Disallowed,
    Resolved(ComponentHandle),
}

/// Render-time resolver: name -> implementation handle.
///
/// Independent of how the template compiler treated the reference; a
/// placeholder that slipped through is still checked here.
#[derive(Clone)]
pub struct ComponentResolver {
    registry: Arc<ComponentRegistry>,
    allowlist: ComponentAllowlist,
    on_unknown: Option<ComponentCallback>,
    on_disallowed: Option<ComponentCallback>,
}

impl ComponentResolver {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self {
            registry,
            allowlist: ComponentAllowlist::allow_all(),
            on_unknown: None,
            on_disallowed: None,
        }
    }

    /// Resolver-level allowlist; empty means every registered component.
    pub fn with_allowed_components(mut self, names: &[String]) -> Result<Self> {
        self.allowlist = ComponentAllowlist::compile(names)?;
        Ok(self)
    }

    pub fn on_unknown_component(mut self, cb: ComponentCallback) -> Self {
        self.on_unknown = Some(cb);
        self
    }

    pub fn on_disallowed_component(mut self, cb: ComponentCallback) -> Self {
        self.on_disallowed = Some(cb);
        self
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// Classify without side effects.
    pub fn classify(&self, name: &str) -> Resolution {
        let Some(entry) = self.registry.get(name) else {
            return Resolution::Unknown;
        };
        if !self.allowlist.is_allowed(name) {
            return Resolution::Disallowed;
        }
        Resolution::Resolved(entry.handle())
    }

    pub fn resolve(&self, name: &str) -> Option<ComponentHandle> {
        match self.classify(name) {
            Resolution::Unknown => {
                tracing::warn!(component = %name, "unknown component");
                if let Some(cb) = &self.on_unknown {
                    cb(name);
                }
                None
            }
            Resolution::Disallowed => {
                tracing::warn!(component = %name, "component not allowed by resolver");
                if let Some(cb) = &self.on_disallowed {
                    cb(name);
                }
                None
            }
            Resolution::Resolved(handle) => Some(handle),
        }
    }

    pub fn can_resolve(&self, name: &str) -> bool {
        matches!(self.classify(name), Resolution::Resolved(_))
    }

    /// Registered names that pass the allowlist, sorted.
    pub fn get_allowed(&self) -> Vec<String> {
        self.registry
            .names()
            .into_iter()
            .filter(|n| self.allowlist.is_allowed(n))
            .collect()
    }
}

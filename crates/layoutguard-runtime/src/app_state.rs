//! Shared relay state.

use std::sync::Arc;

use layoutguard_core::error::{LayoutError, Result};

use crate::collab::CollabHub;
use crate::config::LayoutConfig;
use crate::policy::SecurityPolicy;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: LayoutConfig,
    policy: Arc<SecurityPolicy>,
    hub: Arc<CollabHub>,
}

impl AppState {
    /// Compile the security policy once and build the hub around it.
    pub fn new(cfg: LayoutConfig) -> Result<Self> {
        let policy = Arc::new(SecurityPolicy::new(&cfg.security).map_err(|e| {
            LayoutError::BadRequest(format!("security policy compile failed: {e}"))
        })?);
        let hub = Arc::new(CollabHub::new(Arc::clone(&policy)));

        if cfg.tickets.is_empty() {
            tracing::warn!("no tickets configured; every relay connection will be refused");
        }

        Ok(Self {
            inner: Arc::new(AppStateInner { cfg, policy, hub }),
        })
    }

    pub fn cfg(&self) -> &LayoutConfig {
        &self.inner.cfg
    }

    pub fn policy(&self) -> Arc<SecurityPolicy> {
        Arc::clone(&self.inner.policy)
    }

    pub fn hub(&self) -> Arc<CollabHub> {
        Arc::clone(&self.inner.hub)
    }

    pub fn resolve_ticket(&self, ticket: &str) -> Result<String> {
        self.inner
            .cfg
            .tickets
            .get(ticket)
            .cloned()
            .ok_or(LayoutError::AuthFailed)
    }
}

//! Allowlist compilation and matching utilities.
//!
//! Two shapes:
//! - Component names: exact membership, empty list means "allow all".
//! - Binding roots: exact membership on the first path segment, empty list
//!   means "deny all".

use std::collections::HashSet;

use layoutguard_core::error::{LayoutError, Result};

/// Compiled component allowlist.
#[derive(Debug, Clone, Default)]
pub struct ComponentAllowlist {
    names: Option<HashSet<String>>, // None => wildcard
}

impl ComponentAllowlist {
    pub fn compile(raw: &[String]) -> Result<Self> {
        if raw.is_empty() {
            return Ok(Self { names: None });
        }
        let mut names = HashSet::with_capacity(raw.len());
        for s in raw {
            let s = s.trim();
            if s.is_empty() {
                return Err(LayoutError::BadRequest(
                    "allowed_components entry must not be blank".into(),
                ));
            }
            names.insert(s.to_string());
        }
        Ok(Self { names: Some(names) })
    }

    pub fn allow_all() -> Self {
        Self { names: None }
    }

    pub fn is_wildcard(&self) -> bool {
        self.names.is_none()
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        match &self.names {
            None => true,
            Some(set) => set.contains(name),
        }
    }
}

/// Compiled set of permitted binding roots.
#[derive(Debug, Clone, Default)]
pub struct RootAllowlist {
    roots: Vec<String>,
    index: HashSet<String>,
}

impl RootAllowlist {
    pub fn compile(raw: &[String]) -> Self {
        let mut roots = Vec::with_capacity(raw.len());
        let mut index = HashSet::with_capacity(raw.len());
        for r in raw {
            if index.insert(r.clone()) {
                roots.push(r.clone());
            }
        }
        Self { roots, index }
    }

    pub fn contains(&self, root: &str) -> bool {
        self.index.contains(root)
    }

    /// Roots in configuration order, deduplicated.
    pub fn roots(&self) -> &[String] {
        &self.roots
    }
}

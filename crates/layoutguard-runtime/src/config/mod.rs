//! Runtime config loader (strict parsing).

pub mod schema;

use std::fs;

use layoutguard_core::error::{LayoutError, Result};

pub use schema::{LayoutConfig, SecurityConfig, ServerSection};

pub fn load_from_file(path: &str) -> Result<LayoutConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| LayoutError::Internal(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<LayoutConfig> {
    let cfg: LayoutConfig = serde_yaml::from_str(s)
        .map_err(|e| LayoutError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

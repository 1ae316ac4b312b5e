//! Command handler modules for mqk-cli.
//!
//! Shared utilities used by multiple command paths live here.

pub mod plugins;

use anyhow::{Context, Result};
use mqk_config::{report_unused_keys, EngineConfig, UnusedKeyPolicy};
use mqk_schemas::PluginKind;
use tracing::{info, warn};

/// Merge `paths` (none means all defaults) into a typed engine config.
/// Unknown keys are logged, never silently dropped.
pub fn load_engine_config(paths: &[String]) -> Result<EngineConfig> {
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = mqk_config::load_layered_yaml(&path_refs)?;

    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    for pointer in &report.unused_leaf_pointers {
        warn!(pointer = %pointer, "config key is not read by the engine");
    }

    let cfg = loaded.engine_config().context("engine config invalid")?;
    info!(config_hash = %loaded.config_hash, layers = paths.len(), "config loaded");
    Ok(cfg)
}

/// Parse a CLI `--kind` string into a [`PluginKind`].
pub fn parse_kind(kind: &str) -> Result<PluginKind> {
    PluginKind::parse(&kind.trim().to_lowercase()).ok_or_else(|| {
        anyhow::anyhow!("invalid --kind '{}'. expected one of: indicator | strategy", kind)
    })
}

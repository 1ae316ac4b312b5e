use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Typed engine configuration. Every section and field has a default, so an
/// empty config is a valid one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub paths: PathsConfig,
    pub sandbox: SandboxConfig,
    pub fixture: FixtureConfig,
    pub safety: SafetyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// `<submissions_root>/<kind>/<id>/{manifest.yaml,source.mqs}`
    pub submissions_root: PathBuf,
    /// Verdict files and `index.json`.
    pub registry_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            submissions_root: PathBuf::from("plugins/submissions"),
            registry_root: PathBuf::from("plugins/registry"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock budget per run. The CPU rlimit is derived from it.
    pub timeout_secs: f64,
    pub memory_limit_mb: u64,
    /// Cap on bytes read from a worker's result channel.
    pub max_output_bytes: u64,
    /// Run the two executions concurrently instead of back to back.
    pub parallel_runs: bool,
    /// Worker executable. Unset means the running `mqk` binary in worker mode.
    pub worker_program: Option<PathBuf>,
    pub worker_args: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5.0,
            memory_limit_mb: 512,
            max_output_bytes: 8 * 1024 * 1024,
            parallel_runs: true,
            worker_program: None,
            worker_args: Vec::new(),
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    pub bars: usize,
    pub seed: u64,
    /// Load the fixture from a JSON file instead of generating it.
    pub path: Option<PathBuf>,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            bars: 256,
            seed: 0x6d71_6b5f_6669_7874,
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SafetyConfig {
    /// Modules allowed in addition to `math`.
    pub extra_allowed_modules: Vec<String>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        let t = self.sandbox.timeout_secs;
        if !t.is_finite() || t <= 0.0 || t > 3600.0 {
            bail!("CONFIG_INVALID sandbox.timeout_secs must be in (0, 3600], got {t}");
        }
        if self.sandbox.memory_limit_mb < 16 {
            bail!(
                "CONFIG_INVALID sandbox.memory_limit_mb must be >= 16, got {}",
                self.sandbox.memory_limit_mb
            );
        }
        if self.sandbox.max_output_bytes == 0 {
            bail!("CONFIG_INVALID sandbox.max_output_bytes must be > 0");
        }
        if self.fixture.bars == 0 {
            bail!("CONFIG_INVALID fixture.bars must be > 0");
        }
        for m in &self.safety.extra_allowed_modules {
            if m.is_empty() || !m.split('.').all(is_identifier) {
                bail!("CONFIG_INVALID safety.extra_allowed_modules entry {m:?} is not a module name");
            }
        }
        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.sandbox.timeout(), Duration::from_secs(5));
        assert_eq!(cfg.sandbox.memory_limit_mb, 512);
        assert_eq!(cfg.fixture.bars, 256);
        assert!(cfg.sandbox.parallel_runs);
    }

    #[test]
    fn rejects_non_positive_timeout() {
        let mut cfg = EngineConfig::default();
        cfg.sandbox.timeout_secs = 0.0;
        assert!(cfg.validate().is_err());
        cfg.sandbox.timeout_secs = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_malformed_module_names() {
        let mut cfg = EngineConfig::default();
        cfg.safety.extra_allowed_modules = vec!["stats".into(), "bad name".into()];
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("bad name"));
    }
}

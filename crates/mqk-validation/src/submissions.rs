//! Submission directory convention:
//!
//! ```text
//! <submissions_root>/<kind>/<id>/manifest.yaml
//! <submissions_root>/<kind>/<id>/source.mqs
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mqk_manifest::is_valid_plugin_id;
use mqk_schemas::{PluginKind, Submission};
use tracing::warn;

pub const MANIFEST_FILE: &str = "manifest.yaml";
pub const SOURCE_FILE: &str = "source.mqs";

pub fn submission_dir(root: &Path, kind: PluginKind, id: &str) -> PathBuf {
    root.join(kind.as_str()).join(id)
}

pub fn load_submission(root: &Path, kind: PluginKind, id: &str) -> Result<Submission> {
    let dir = submission_dir(root, kind, id);
    let manifest_path = dir.join(MANIFEST_FILE);
    let source_path = dir.join(SOURCE_FILE);
    let manifest = fs::read_to_string(&manifest_path)
        .with_context(|| format!("read manifest failed: {}", manifest_path.display()))?;
    let source = fs::read_to_string(&source_path)
        .with_context(|| format!("read source failed: {}", source_path.display()))?;
    Ok(Submission::new(id, kind, manifest, source))
}

/// Every `(kind, id)` under the root; indicators first, ids sorted, so
/// strategies are validated after the indicators they may depend on.
pub fn discover_submissions(root: &Path) -> Result<Vec<(PluginKind, String)>> {
    let mut found = Vec::new();
    for kind in PluginKind::ALL {
        let kind_dir = root.join(kind.as_str());
        if !kind_dir.is_dir() {
            continue;
        }
        let mut ids = Vec::new();
        let entries = fs::read_dir(&kind_dir)
            .with_context(|| format!("list submissions failed: {}", kind_dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("list submissions failed: {}", kind_dir.display()))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_valid_plugin_id(&name) {
                warn!(kind = %kind, dir = %name, "skipping submission directory with invalid plugin id");
                continue;
            }
            ids.push(name);
        }
        ids.sort();
        found.extend(ids.into_iter().map(|id| (kind, id)));
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(root: &Path, kind: &str, id: &str) {
        let dir = root.join(kind).join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE), "id: x\n").unwrap();
        fs::write(dir.join(SOURCE_FILE), "def compute(bars, params):\n    return []\n").unwrap();
    }

    #[test]
    fn discovery_orders_indicators_first() {
        let dir = tempfile::tempdir().unwrap();
        put(dir.path(), "strategy", "cross");
        put(dir.path(), "indicator", "sma");
        put(dir.path(), "indicator", "ema");
        put(dir.path(), "indicator", "bad id");

        let found = discover_submissions(dir.path()).unwrap();
        assert_eq!(
            found,
            vec![
                (PluginKind::Indicator, "ema".to_string()),
                (PluginKind::Indicator, "sma".to_string()),
                (PluginKind::Strategy, "cross".to_string()),
            ]
        );
    }

    #[test]
    fn load_hashes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        put(dir.path(), "indicator", "sma");
        let sub = load_submission(dir.path(), PluginKind::Indicator, "sma").unwrap();
        assert_eq!(sub.id(), "sma");
        assert!(sub.source_hash().starts_with("sha256:"));

        let missing = load_submission(dir.path(), PluginKind::Indicator, "nope").unwrap_err();
        assert!(format!("{missing:#}").contains("read manifest failed"));
    }
}

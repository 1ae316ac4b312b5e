//! Artifact registry: verdict files plus `index.json`.
//!
//! Write order is verdict file, then index, each atomic, so an index entry
//! never points at a missing or partial verdict. Readers are fail-closed:
//! anything short of a parseable, consistent VALID verdict that agrees with
//! its index entry is not valid.
//!
//! Writers serialize on an in-process mutex and then on the advisory
//! `index.lock`, so several processes may record into one root.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use mqk_schemas::{ErrorCode, PluginKind, ValidationVerdict, VerdictStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::atomic::write_json_atomic;
use crate::index::{IndexEntry, RegistryIndex, INDEX_FILE, INDEX_SCHEMA_VERSION};
use crate::lock::IndexLock;

/// Why a registry entry cannot be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    Unreadable { path: PathBuf, message: String },
    Undecodable { path: PathBuf, message: String },
    Inconsistent { path: PathBuf, message: String },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Unreadable { path, message } => {
                write!(f, "verdict file unreadable: {}: {message}", path.display())
            }
            RegistryError::Undecodable { path, message } => {
                write!(f, "verdict file malformed: {}: {message}", path.display())
            }
            RegistryError::Inconsistent { path, message } => {
                write!(f, "verdict file inconsistent: {}: {message}", path.display())
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Result of resolving one plugin against the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryLookup {
    Valid(ValidationVerdict),
    Invalid(ValidationVerdict),
    Missing,
    Malformed(RegistryError),
}

impl RegistryLookup {
    /// Only an intact VALID verdict counts.
    pub fn is_valid(&self) -> bool {
        matches!(self, RegistryLookup::Valid(_))
    }

    pub fn verdict(&self) -> Option<&ValidationVerdict> {
        match self {
            RegistryLookup::Valid(v) | RegistryLookup::Invalid(v) => Some(v),
            _ => None,
        }
    }
}

/// Row of the status / active / failed listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginStatus {
    pub kind: PluginKind,
    pub id: String,
    pub status: VerdictStatus,
    pub error_code: Option<ErrorCode>,
    /// First reason, verbatim; or why the verdict could not be read.
    pub reason: Option<String>,
    pub checked_at: Option<DateTime<Utc>>,
}

pub struct Registry {
    root: PathBuf,
    snapshot: RwLock<Arc<RegistryIndex>>,
    /// Serializes index updates within the process; `index.lock` does the
    /// same across processes.
    write_lock: Mutex<()>,
}

impl Registry {
    /// Open (creating the root if needed) and load the current index.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create registry root failed: {}", root.display()))?;
        let index = read_index(&root)?.unwrap_or_else(RegistryIndex::empty);
        Ok(Self {
            root,
            snapshot: RwLock::new(Arc::new(index)),
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<kind>/<id>.json`, relative to the root.
    pub fn verdict_rel_path(kind: PluginKind, id: &str) -> String {
        format!("{}/{}.json", kind.as_str(), id)
    }

    pub fn verdict_path(&self, kind: PluginKind, id: &str) -> PathBuf {
        self.root.join(Self::verdict_rel_path(kind, id))
    }

    /// Current index. Takes the read side of an `RwLock` only to clone the
    /// `Arc`; a writer holds the write side only to swap the pointer, never
    /// across file I/O, so readers wait at most one pointer store.
    pub fn snapshot(&self) -> Arc<RegistryIndex> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Persist a terminal verdict and point the index at it.
    pub fn record(&self, verdict: &ValidationVerdict) -> Result<IndexEntry> {
        if !is_safe_id(&verdict.plugin_id) {
            bail!("REGISTRY_BAD_ID {:?}", verdict.plugin_id);
        }
        if !verdict.is_consistent() {
            bail!(
                "REGISTRY_INCONSISTENT_VERDICT {}/{}",
                verdict.kind,
                verdict.plugin_id
            );
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("registry write lock poisoned"))?;
        let _file_lock = IndexLock::acquire(&self.root)?;

        let rel = Self::verdict_rel_path(verdict.kind, &verdict.plugin_id);
        let path = self.root.join(&rel);
        write_json_atomic(&path, verdict)
            .with_context(|| format!("write verdict failed: {}", path.display()))?;

        // Merge into the on-disk index so verdicts recorded by another
        // process since open() are kept.
        let base = match read_index(&self.root) {
            Ok(Some(disk)) => Arc::new(disk),
            Ok(None) => self.snapshot(),
            Err(e) => {
                warn!(error = %e, "index.json unreadable; rebuilding from in-memory snapshot");
                self.snapshot()
            }
        };
        let entry = IndexEntry::for_verdict(verdict, rel);
        let next = base.with_entry(entry.clone(), Utc::now());
        let index_path = self.root.join(INDEX_FILE);
        write_json_atomic(&index_path, &next)
            .with_context(|| format!("write index failed: {}", index_path.display()))?;

        match self.snapshot.write() {
            Ok(mut guard) => *guard = Arc::new(next),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(next),
        }

        info!(
            plugin_id = %verdict.plugin_id,
            kind = %verdict.kind,
            status = verdict.status.as_str(),
            error_code = ?verdict.error_code,
            "verdict recorded"
        );
        Ok(entry)
    }

    pub fn lookup(&self, kind: PluginKind, id: &str) -> RegistryLookup {
        let snapshot = self.snapshot();
        match snapshot.get(kind, id) {
            Some(entry) => self.check_entry(entry),
            None => RegistryLookup::Missing,
        }
    }

    /// Previous verdict for exactly this content, reached under the same
    /// engine settings, if intact.
    pub fn cached_verdict(
        &self,
        kind: PluginKind,
        id: &str,
        source_hash: &str,
        engine_fingerprint: &str,
    ) -> Option<ValidationVerdict> {
        self.lookup(kind, id)
            .verdict()
            .filter(|v| {
                v.source_hash == source_hash
                    && !v.engine_fingerprint.is_empty()
                    && v.engine_fingerprint == engine_fingerprint
            })
            .cloned()
    }

    /// Every indexed plugin, each re-checked against its verdict file.
    pub fn status(&self) -> Vec<PluginStatus> {
        let snapshot = self.snapshot();
        snapshot
            .entries
            .values()
            .map(|entry| match self.check_entry(entry) {
                RegistryLookup::Valid(v) | RegistryLookup::Invalid(v) => PluginStatus {
                    kind: v.kind,
                    id: v.plugin_id.clone(),
                    status: v.status,
                    error_code: v.error_code,
                    reason: v.primary_reason().map(str::to_string),
                    checked_at: Some(v.checked_at),
                },
                RegistryLookup::Malformed(e) => PluginStatus {
                    kind: entry.kind,
                    id: entry.id.clone(),
                    status: VerdictStatus::Invalid,
                    error_code: None,
                    reason: Some(e.to_string()),
                    checked_at: None,
                },
                // An entry we are iterating cannot be missing from the index.
                RegistryLookup::Missing => PluginStatus {
                    kind: entry.kind,
                    id: entry.id.clone(),
                    status: VerdictStatus::Invalid,
                    error_code: None,
                    reason: Some("no verdict".to_string()),
                    checked_at: None,
                },
            })
            .collect()
    }

    /// Plugins collaborators may load.
    pub fn active(&self) -> Vec<PluginStatus> {
        self.status()
            .into_iter()
            .filter(|s| s.status == VerdictStatus::Valid)
            .collect()
    }

    /// Everything else, including unreadable verdicts.
    pub fn failed(&self) -> Vec<PluginStatus> {
        self.status()
            .into_iter()
            .filter(|s| s.status != VerdictStatus::Valid)
            .collect()
    }

    fn check_entry(&self, entry: &IndexEntry) -> RegistryLookup {
        let path = self.root.join(&entry.verdict_path);
        let malformed = |e: RegistryError| {
            warn!(kind = %entry.kind, id = %entry.id, error = %e, "registry entry treated as invalid");
            RegistryLookup::Malformed(e)
        };

        let raw = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) => {
                return malformed(RegistryError::Unreadable {
                    path,
                    message: e.to_string(),
                })
            }
        };
        let verdict: ValidationVerdict = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                return malformed(RegistryError::Undecodable {
                    path,
                    message: e.to_string(),
                })
            }
        };

        let mismatch = if verdict.kind != entry.kind || verdict.plugin_id != entry.id {
            Some("plugin identity does not match index entry")
        } else if verdict.source_hash != entry.source_hash
            || verdict.engine_fingerprint != entry.engine_fingerprint
            || verdict.status != entry.status
        {
            Some("verdict does not match index entry")
        } else if !verdict.is_consistent() {
            Some("status, error code and reasons disagree")
        } else {
            None
        };
        if let Some(message) = mismatch {
            return malformed(RegistryError::Inconsistent {
                path,
                message: message.to_string(),
            });
        }

        if verdict.is_valid() {
            RegistryLookup::Valid(verdict)
        } else {
            RegistryLookup::Invalid(verdict)
        }
    }
}

fn read_index(root: &Path) -> Result<Option<RegistryIndex>> {
    let path = root.join(INDEX_FILE);
    let raw = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read index failed: {}", path.display())),
    };
    let index: RegistryIndex = serde_json::from_str(&raw)
        .with_context(|| format!("REGISTRY_INDEX_MALFORMED {}", path.display()))?;
    if index.schema_version != INDEX_SCHEMA_VERSION {
        bail!(
            "REGISTRY_INDEX_MALFORMED {}: unsupported schema_version {}",
            path.display(),
            index.schema_version
        );
    }
    Ok(Some(index))
}

/// Ids become file names; anything outside `[A-Za-z0-9_-]` is refused.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqk_schemas::ValidationStage;

    fn valid(id: &str) -> ValidationVerdict {
        ValidationVerdict::valid(id, PluginKind::Indicator, "sha256:aa", Vec::new(), Utc::now())
    }

    #[test]
    fn path_like_ids_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Registry::open(dir.path()).unwrap();
        let err = reg.record(&valid("../escape")).unwrap_err();
        assert!(format!("{err}").contains("REGISTRY_BAD_ID"));
    }

    #[test]
    fn record_then_lookup_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Registry::open(dir.path()).unwrap();
        let entry = reg.record(&valid("sma")).unwrap();
        assert_eq!(entry.verdict_path, "indicator/sma.json");
        assert!(reg.lookup(PluginKind::Indicator, "sma").is_valid());
        assert_eq!(reg.lookup(PluginKind::Strategy, "sma"), RegistryLookup::Missing);

        // Reopening sees the persisted index.
        let again = Registry::open(dir.path()).unwrap();
        assert!(again.lookup(PluginKind::Indicator, "sma").is_valid());
    }

    #[test]
    fn later_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Registry::open(dir.path()).unwrap();
        reg.record(&valid("sma")).unwrap();
        let invalid = ValidationVerdict::invalid(
            "sma",
            PluginKind::Indicator,
            "sha256:bb",
            ErrorCode::RuntimeError,
            vec!["boom".to_string()],
            Vec::new(),
            ValidationStage::StaticallySafe,
            Utc::now(),
        );
        reg.record(&invalid).unwrap();
        let found = reg.lookup(PluginKind::Indicator, "sma");
        assert!(matches!(found, RegistryLookup::Invalid(ref v) if v.source_hash == "sha256:bb"));
        assert_eq!(reg.snapshot().entries.len(), 1);
    }

    #[test]
    fn cached_verdict_requires_matching_hash() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Registry::open(dir.path()).unwrap();
        reg.record(&valid("sma").with_engine_fingerprint("sha256:e1")).unwrap();
        assert!(reg
            .cached_verdict(PluginKind::Indicator, "sma", "sha256:aa", "sha256:e1")
            .is_some());
        assert!(reg
            .cached_verdict(PluginKind::Indicator, "sma", "sha256:cc", "sha256:e1")
            .is_none());
    }

    #[test]
    fn cached_verdict_requires_matching_engine_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Registry::open(dir.path()).unwrap();
        reg.record(&valid("sma").with_engine_fingerprint("sha256:e1")).unwrap();
        assert!(reg
            .cached_verdict(PluginKind::Indicator, "sma", "sha256:aa", "sha256:e2")
            .is_none());
        assert_eq!(
            reg.snapshot().get(PluginKind::Indicator, "sma").unwrap().engine_fingerprint,
            "sha256:e1"
        );

        // Unstamped verdicts are never reused.
        reg.record(&valid("ema")).unwrap();
        assert!(reg.lookup(PluginKind::Indicator, "ema").is_valid());
        assert!(reg
            .cached_verdict(PluginKind::Indicator, "ema", "sha256:aa", "")
            .is_none());
    }

    #[test]
    fn fingerprint_disagreeing_with_index_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Registry::open(dir.path()).unwrap();
        reg.record(&valid("sma").with_engine_fingerprint("sha256:e1")).unwrap();
        let path = reg.verdict_path(PluginKind::Indicator, "sma");
        let raw = fs::read_to_string(&path).unwrap().replace("sha256:e1", "sha256:e9");
        fs::write(&path, raw).unwrap();
        assert!(matches!(
            reg.lookup(PluginKind::Indicator, "sma"),
            RegistryLookup::Malformed(RegistryError::Inconsistent { .. })
        ));
    }

    #[test]
    fn snapshot_does_not_wait_for_a_writer() {
        use std::sync::mpsc;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let reg = Arc::new(Registry::open(dir.path()).unwrap());
        reg.record(&valid("sma")).unwrap();

        // A writer mid-record holds both of these across its file I/O.
        let _writer = reg.write_lock.lock().unwrap();
        let _file_lock = IndexLock::acquire(reg.root()).unwrap();

        let (tx, rx) = mpsc::channel();
        let reader = Arc::clone(&reg);
        std::thread::spawn(move || {
            let n = reader.snapshot().entries.len();
            let valid = reader.lookup(PluginKind::Indicator, "sma").is_valid();
            tx.send((n, valid)).unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), (1, true));
    }

    #[test]
    fn malformed_index_refuses_to_open() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(INDEX_FILE), "{not json").unwrap();
        let err = Registry::open(dir.path()).err().expect("must fail");
        assert!(format!("{err:#}").contains("REGISTRY_INDEX_MALFORMED"));
    }
}

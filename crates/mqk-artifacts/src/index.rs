use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mqk_schemas::{ErrorCode, PluginKind, ValidationVerdict, VerdictStatus};
use serde::{Deserialize, Serialize};

pub const INDEX_SCHEMA_VERSION: u32 = 1;
pub const INDEX_FILE: &str = "index.json";

/// `<kind>/<id>`
pub fn index_key(kind: PluginKind, id: &str) -> String {
    format!("{}/{}", kind.as_str(), id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub kind: PluginKind,
    pub id: String,
    pub status: VerdictStatus,
    pub error_code: Option<ErrorCode>,
    pub source_hash: String,
    #[serde(default)]
    pub engine_fingerprint: String,
    /// Relative to the registry root.
    pub verdict_path: String,
    pub checked_at: DateTime<Utc>,
}

impl IndexEntry {
    pub fn for_verdict(verdict: &ValidationVerdict, verdict_path: String) -> Self {
        Self {
            kind: verdict.kind,
            id: verdict.plugin_id.clone(),
            status: verdict.status,
            error_code: verdict.error_code,
            source_hash: verdict.source_hash.clone(),
            engine_fingerprint: verdict.engine_fingerprint.clone(),
            verdict_path,
            checked_at: verdict.checked_at,
        }
    }
}

/// Immutable snapshot of `index.json`. Updates build a new value and swap it
/// in; a snapshot handed to a reader never changes underneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryIndex {
    pub schema_version: u32,
    pub updated_at_utc: DateTime<Utc>,
    pub entries: BTreeMap<String, IndexEntry>,
}

impl RegistryIndex {
    pub fn empty() -> Self {
        Self {
            schema_version: INDEX_SCHEMA_VERSION,
            updated_at_utc: DateTime::<Utc>::default(),
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, kind: PluginKind, id: &str) -> Option<&IndexEntry> {
        self.entries.get(&index_key(kind, id))
    }

    /// Copy with `entry` inserted; later writes win.
    pub fn with_entry(&self, entry: IndexEntry, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.entries.insert(index_key(entry.kind, &entry.id), entry);
        next.updated_at_utc = now;
        next
    }
}

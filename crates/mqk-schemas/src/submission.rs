use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Domain separator for submission digests. Bump when the digest layout changes.
const DIGEST_DOMAIN: &[u8] = b"mqk.plugin.submission.v1\0";

/// Plugin kind. Determines manifest shape, output shape and registry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Indicator,
    Strategy,
}

impl PluginKind {
    pub const ALL: [PluginKind; 2] = [PluginKind::Indicator, PluginKind::Strategy];

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Indicator => "indicator",
            PluginKind::Strategy => "strategy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "indicator" => Some(PluginKind::Indicator),
            "strategy" => Some(PluginKind::Strategy),
            _ => None,
        }
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An untrusted plugin submission.
///
/// Immutable once validation starts: fields are only set by [`Submission::new`],
/// which also derives `source_hash` so the digest can never drift from the
/// content it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    id: String,
    kind: PluginKind,
    manifest_yaml: String,
    source: String,
    source_hash: String,
}

impl Submission {
    pub fn new(
        id: impl Into<String>,
        kind: PluginKind,
        manifest_yaml: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let manifest_yaml = manifest_yaml.into();
        let source = source.into();
        let source_hash = submission_digest(&manifest_yaml, &source);
        Self {
            id: id.into(),
            kind,
            manifest_yaml,
            source,
            source_hash,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> PluginKind {
        self.kind
    }

    /// Raw manifest text exactly as submitted.
    pub fn manifest_yaml(&self) -> &str {
        &self.manifest_yaml
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// `sha256:<hex>` digest over manifest text and source text.
    pub fn source_hash(&self) -> &str {
        &self.source_hash
    }
}

/// Content digest over a submission's manifest and source.
///
/// Both parts are length-prefixed so moving bytes from one part to the other
/// always changes the digest.
pub fn submission_digest(manifest_yaml: &str, source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(DIGEST_DOMAIN);
    for part in [manifest_yaml.as_bytes(), source.as_bytes()] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

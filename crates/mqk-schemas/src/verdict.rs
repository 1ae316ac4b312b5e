use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ErrorCode, PluginKind};

/// Current on-disk verdict schema.
pub const VERDICT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    Valid,
    Invalid,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictStatus::Valid => "VALID",
            VerdictStatus::Invalid => "INVALID",
        }
    }
}

/// Validation state machine stages, in order.
///
/// `PENDING → SCHEMA_CHECKED → STATICALLY_SAFE → SANDBOX_EXECUTED →
/// DETERMINISM_VERIFIED → DEPENDENCIES_RESOLVED → VALID`; any stage may
/// fall to INVALID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStage {
    Pending,
    SchemaChecked,
    StaticallySafe,
    SandboxExecuted,
    DeterminismVerified,
    DependenciesResolved,
}

impl ValidationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStage::Pending => "PENDING",
            ValidationStage::SchemaChecked => "SCHEMA_CHECKED",
            ValidationStage::StaticallySafe => "STATICALLY_SAFE",
            ValidationStage::SandboxExecuted => "SANDBOX_EXECUTED",
            ValidationStage::DeterminismVerified => "DETERMINISM_VERIFIED",
            ValidationStage::DependenciesResolved => "DEPENDENCIES_RESOLVED",
        }
    }
}

/// Terminal validation outcome for one submission.
///
/// Built only through [`ValidationVerdict::valid`] / [`ValidationVerdict::invalid`]
/// so the status/error-code/reasons invariants hold for every constructed value.
/// A verdict read back from disk is re-checked with [`ValidationVerdict::is_consistent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub schema_version: u32,
    pub plugin_id: String,
    pub kind: PluginKind,
    pub status: VerdictStatus,
    pub error_code: Option<ErrorCode>,
    pub reasons: Vec<String>,
    /// Non-fatal findings (e.g. NaN propagation after warmup).
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Last stage the submission passed.
    pub last_passed_stage: ValidationStage,
    pub source_hash: String,
    /// Digest of the engine settings the verdict was reached under. Empty on
    /// verdicts written before it was recorded; those are never reused.
    #[serde(default)]
    pub engine_fingerprint: String,
    pub checked_at: DateTime<Utc>,
}

impl ValidationVerdict {
    pub fn valid(
        plugin_id: impl Into<String>,
        kind: PluginKind,
        source_hash: impl Into<String>,
        warnings: Vec<String>,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: VERDICT_SCHEMA_VERSION,
            plugin_id: plugin_id.into(),
            kind,
            status: VerdictStatus::Valid,
            error_code: None,
            reasons: Vec::new(),
            warnings,
            last_passed_stage: ValidationStage::DependenciesResolved,
            source_hash: source_hash.into(),
            engine_fingerprint: String::new(),
            checked_at,
        }
    }

    /// INVALID verdict. An empty `reasons` list is replaced by the code itself
    /// so an INVALID verdict always carries at least one reason.
    #[allow(clippy::too_many_arguments)]
    pub fn invalid(
        plugin_id: impl Into<String>,
        kind: PluginKind,
        source_hash: impl Into<String>,
        error_code: ErrorCode,
        mut reasons: Vec<String>,
        warnings: Vec<String>,
        last_passed_stage: ValidationStage,
        checked_at: DateTime<Utc>,
    ) -> Self {
        if reasons.is_empty() {
            reasons.push(error_code.as_str().to_string());
        }
        Self {
            schema_version: VERDICT_SCHEMA_VERSION,
            plugin_id: plugin_id.into(),
            kind,
            status: VerdictStatus::Invalid,
            error_code: Some(error_code),
            reasons,
            warnings,
            last_passed_stage,
            source_hash: source_hash.into(),
            engine_fingerprint: String::new(),
            checked_at,
        }
    }

    pub fn with_engine_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.engine_fingerprint = fingerprint.into();
        self
    }

    pub fn is_valid(&self) -> bool {
        self.status == VerdictStatus::Valid && self.is_consistent()
    }

    /// VALID ⇔ no error code, full stage progression;
    /// INVALID ⇔ error code set and at least one reason.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            VerdictStatus::Valid => {
                self.error_code.is_none()
                    && self.last_passed_stage == ValidationStage::DependenciesResolved
            }
            VerdictStatus::Invalid => self.error_code.is_some() && !self.reasons.is_empty(),
        }
    }

    /// First reason, as surfaced verbatim by the API/UI.
    pub fn primary_reason(&self) -> Option<&str> {
        self.reasons.first().map(String::as_str)
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Intent;

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Stable error codes exposed in verdicts. Collaborators match on the wire
/// names, so variants may be added but never renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SchemaInvalid,
    ForbiddenImport,
    ForbiddenCall,
    GlobalStateDetected,
    RuntimeError,
    RuntimeTimeout,
    NondeterministicOutput,
    WarmupViolation,
    NanPolicyViolation,
    DependencyMissing,
}

/// Error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Contract,
    Security,
    Execution,
    Semantic,
    Linkage,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SchemaInvalid => "SCHEMA_INVALID",
            ErrorCode::ForbiddenImport => "FORBIDDEN_IMPORT",
            ErrorCode::ForbiddenCall => "FORBIDDEN_CALL",
            ErrorCode::GlobalStateDetected => "GLOBAL_STATE_DETECTED",
            ErrorCode::RuntimeError => "RUNTIME_ERROR",
            ErrorCode::RuntimeTimeout => "RUNTIME_TIMEOUT",
            ErrorCode::NondeterministicOutput => "NONDETERMINISTIC_OUTPUT",
            ErrorCode::WarmupViolation => "WARMUP_VIOLATION",
            ErrorCode::NanPolicyViolation => "NAN_POLICY_VIOLATION",
            ErrorCode::DependencyMissing => "DEPENDENCY_MISSING",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorCode::SchemaInvalid => ErrorClass::Contract,
            ErrorCode::ForbiddenImport | ErrorCode::ForbiddenCall | ErrorCode::GlobalStateDetected => {
                ErrorClass::Security
            }
            ErrorCode::RuntimeError | ErrorCode::RuntimeTimeout => ErrorClass::Execution,
            ErrorCode::NondeterministicOutput
            | ErrorCode::WarmupViolation
            | ErrorCode::NanPolicyViolation => ErrorClass::Semantic,
            ErrorCode::DependencyMissing => ErrorClass::Linkage,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Static safety report
// ---------------------------------------------------------------------------

/// One-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Import of a module outside the allow-list.
    ForbiddenImport,
    /// Call to a denylisted primitive (dynamic eval, dynamic import, open, setattr...).
    ForbiddenCall,
    /// Access to introspection internals (dunder attributes, builtins registry).
    ForbiddenAttribute,
    /// Assignment into an attribute/item of an imported or externally-bound object.
    MonkeyPatch,
    /// Assignment into a name bound outside the local function scope.
    GlobalMutation,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::ForbiddenImport => "forbidden_import",
            ViolationKind::ForbiddenCall => "forbidden_call",
            ViolationKind::ForbiddenAttribute => "forbidden_attribute",
            ViolationKind::MonkeyPatch => "monkey_patch",
            ViolationKind::GlobalMutation => "global_mutation",
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            ViolationKind::ForbiddenImport => ErrorCode::ForbiddenImport,
            ViolationKind::ForbiddenCall | ViolationKind::ForbiddenAttribute => {
                ErrorCode::ForbiddenCall
            }
            ViolationKind::MonkeyPatch | ViolationKind::GlobalMutation => {
                ErrorCode::GlobalStateDetected
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyViolation {
    pub kind: ViolationKind,
    pub location: SourceLocation,
    pub detail: String,
}

impl std::fmt::Display for SafetyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {} ({}): {}",
            self.kind.error_code(),
            self.location,
            self.kind.as_str(),
            self.detail
        )
    }
}

/// Ordered list of violations (source order). Empty means statically safe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyScanReport {
    pub violations: Vec<SafetyViolation>,
}

impl SafetyScanReport {
    pub fn is_safe(&self) -> bool {
        self.violations.is_empty()
    }

    /// Error code of the first violation; first violation wins.
    pub fn primary_code(&self) -> Option<ErrorCode> {
        self.violations.first().map(|v| v.kind.error_code())
    }

    pub fn reasons(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }
}

// ---------------------------------------------------------------------------
// Sandbox execution
// ---------------------------------------------------------------------------

/// Shape-checked plugin output.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginOutput {
    /// One series per declared output, each aligned to the fixture length.
    /// NaN marks a missing value.
    Indicator { series: BTreeMap<String, Vec<f64>> },
    /// One intent per fixture sample.
    Strategy { intents: Vec<Intent> },
}

impl PluginOutput {
    pub fn len(&self) -> usize {
        match self {
            PluginOutput::Indicator { series } => {
                series.values().map(Vec::len).max().unwrap_or(0)
            }
            PluginOutput::Strategy { intents } => intents.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunFailureKind {
    /// Wall-clock watchdog fired and terminated the worker.
    Timeout,
    /// Worker could not be started.
    SpawnFailed,
    /// Worker exited (code or signal) without a complete result payload.
    AbnormalExit,
    /// Payload present but undecodable.
    MalformedPayload,
    /// Worker wrote more than the configured output cap.
    OutputTooLarge,
    /// Plugin code raised (parse error, runtime error, bad entrypoint).
    PluginRaised,
    /// Output does not match the declared output shape.
    ShapeMismatch,
}

/// Why a run produced no usable output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub kind: RunFailureKind,
    pub detail: String,
}

impl RunFailure {
    pub fn new(kind: RunFailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self.kind {
            RunFailureKind::Timeout => ErrorCode::RuntimeTimeout,
            _ => ErrorCode::RuntimeError,
        }
    }
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.detail)
    }
}

/// Result of one isolated execution.
///
/// Exactly one of `output` / `error` is set. `exit_code` and `signal` are
/// recorded for every run that got as far as spawning, so a crash and a
/// resource-limit kill stay distinguishable.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxExecutionResult {
    pub run_index: u8,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub wall_time_ms: u64,
    pub cpu_time_ms: Option<u64>,
    pub peak_memory_kb: Option<u64>,
    pub output: Option<PluginOutput>,
    pub error: Option<RunFailure>,
}

impl SandboxExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.output.is_some() && self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(kind: ViolationKind, line: u32) -> SafetyViolation {
        SafetyViolation {
            kind,
            location: SourceLocation { line, column: 1 },
            detail: "x".to_string(),
        }
    }

    #[test]
    fn first_violation_wins_primary_code() {
        let report = SafetyScanReport {
            violations: vec![
                violation(ViolationKind::GlobalMutation, 3),
                violation(ViolationKind::ForbiddenImport, 9),
            ],
        };
        assert_eq!(report.primary_code(), Some(ErrorCode::GlobalStateDetected));
        assert_eq!(report.reasons().len(), 2);
        assert!(report.reasons()[1].starts_with("FORBIDDEN_IMPORT at 9:1"));
    }

    #[test]
    fn attribute_access_maps_to_forbidden_call() {
        assert_eq!(
            ViolationKind::ForbiddenAttribute.error_code(),
            ErrorCode::ForbiddenCall
        );
        assert_eq!(
            ViolationKind::MonkeyPatch.error_code(),
            ErrorCode::GlobalStateDetected
        );
    }

    #[test]
    fn only_timeout_maps_to_runtime_timeout() {
        assert_eq!(
            RunFailure::new(RunFailureKind::Timeout, "t").error_code(),
            ErrorCode::RuntimeTimeout
        );
        assert_eq!(
            RunFailure::new(RunFailureKind::AbnormalExit, "sig 9").error_code(),
            ErrorCode::RuntimeError
        );
    }

    #[test]
    fn error_code_wire_names() {
        let s = serde_json::to_string(&ErrorCode::NanPolicyViolation).unwrap();
        assert_eq!(s, "\"NAN_POLICY_VIOLATION\"");
        assert_eq!(ErrorCode::DependencyMissing.class(), ErrorClass::Linkage);
    }
}

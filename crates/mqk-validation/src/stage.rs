use mqk_schemas::ErrorCode;

/// A stage rejected the submission. Converted into an INVALID verdict by the
/// orchestrator; never surfaces to callers as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub code: ErrorCode,
    /// Never empty.
    pub reasons: Vec<String>,
}

impl StageFailure {
    pub fn new(code: ErrorCode, mut reasons: Vec<String>) -> Self {
        if reasons.is_empty() {
            reasons.push(code.as_str().to_string());
        }
        Self { code, reasons }
    }

    pub fn single(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::new(code, vec![reason.into()])
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.reasons.join("; "))
    }
}

impl std::error::Error for StageFailure {}

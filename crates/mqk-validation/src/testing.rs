//! Test doubles for the executor and lookup seams, so the oracle and the
//! orchestrator can be exercised without spawning processes. Compiled only
//! for tests or with the `testing` feature.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use mqk_artifacts::{RegistryError, RegistryLookup};
use mqk_sandbox::{ExecutionSpec, PluginExecutor};
use mqk_schemas::{
    ErrorCode, PluginKind, PluginOutput, RunFailure, SampleFixture, SandboxExecutionResult,
    ValidationStage, ValidationVerdict,
};

#[derive(Debug, Clone)]
pub enum ScriptedRun {
    Output(PluginOutput),
    Fail(RunFailure),
    /// Never resolves; only an outer deadline ends it.
    Hang,
}

/// Replays a fixed outcome per run index.
#[derive(Debug)]
pub struct ScriptedExecutor {
    runs: [ScriptedRun; 2],
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(first: ScriptedRun, second: ScriptedRun) -> Self {
        Self {
            runs: [first, second],
            calls: AtomicUsize::new(0),
        }
    }

    pub fn same(output: PluginOutput) -> Self {
        Self::new(ScriptedRun::Output(output.clone()), ScriptedRun::Output(output))
    }

    /// Number of `execute` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PluginExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _spec: &ExecutionSpec,
        _fixture: &SampleFixture,
        run_index: u8,
    ) -> SandboxExecutionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut res = SandboxExecutionResult {
            run_index,
            exit_code: Some(0),
            signal: None,
            wall_time_ms: 1,
            cpu_time_ms: Some(1),
            peak_memory_kb: Some(1024),
            output: None,
            error: None,
        };
        match &self.runs[usize::from(run_index) % 2] {
            ScriptedRun::Output(o) => res.output = Some(o.clone()),
            ScriptedRun::Fail(f) => {
                res.exit_code = Some(3);
                res.error = Some(f.clone());
            }
            ScriptedRun::Hang => return std::future::pending().await,
        }
        res
    }
}

/// In-memory registry view keyed by `(kind, id)`.
#[derive(Debug, Clone, Default)]
pub struct StaticLookup {
    entries: BTreeMap<(PluginKind, String), RegistryLookup>,
}

impl StaticLookup {
    pub fn with_valid(mut self, id: &str) -> Self {
        let v = ValidationVerdict::valid(id, PluginKind::Indicator, "sha256:test", Vec::new(), Utc::now());
        self.entries
            .insert((PluginKind::Indicator, id.to_string()), RegistryLookup::Valid(v));
        self
    }

    pub fn with_invalid(mut self, id: &str, code: ErrorCode) -> Self {
        let v = ValidationVerdict::invalid(
            id,
            PluginKind::Indicator,
            "sha256:test",
            code,
            Vec::new(),
            Vec::new(),
            ValidationStage::Pending,
            Utc::now(),
        );
        self.entries
            .insert((PluginKind::Indicator, id.to_string()), RegistryLookup::Invalid(v));
        self
    }

    pub fn with_malformed(mut self, id: &str) -> Self {
        let e = RegistryError::Undecodable {
            path: PathBuf::from(format!("indicator/{id}.json")),
            message: "expected value at line 1 column 1".to_string(),
        };
        self.entries
            .insert((PluginKind::Indicator, id.to_string()), RegistryLookup::Malformed(e));
        self
    }
}

impl crate::VerdictLookup for StaticLookup {
    fn lookup(&self, kind: PluginKind, id: &str) -> RegistryLookup {
        self.entries
            .get(&(kind, id.to_string()))
            .cloned()
            .unwrap_or(RegistryLookup::Missing)
    }
}

//! Validation Orchestrator.
//!
//! ```text
//! PENDING → SCHEMA_CHECKED → STATICALLY_SAFE → SANDBOX_EXECUTED
//!         → DETERMINISM_VERIFIED → DEPENDENCIES_RESOLVED → VALID
//! ```
//!
//! Strictly linear and non-retrying: the first failing stage produces the
//! INVALID verdict. The sandbox stage runs under an outer deadline on top of
//! the per-run watchdogs, so `validate` always returns within
//! `2 * run_timeout + ORCHESTRATION_GRACE` plus static analysis time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use mqk_artifacts::Registry;
use mqk_config::{EngineConfig, SandboxConfig};
use mqk_manifest::validate_manifest;
use mqk_safety::{SafetyAnalyzer, SafetyPolicy};
use mqk_sandbox::{execute_twice, fixture_from_config, ExecutionSpec, PluginExecutor, ProcessSandbox};
use mqk_schemas::{
    ErrorCode, PluginKind, SampleFixture, SandboxExecutionResult, Submission, ValidationStage,
    ValidationVerdict,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, Instrument};

use crate::deps::{resolve_dependencies, VerdictLookup};
use crate::fingerprint::engine_fingerprint;
use crate::policy::check_runs;
use crate::stage::StageFailure;

/// Slack on top of the run timeouts for spawn, reaping and result decoding.
pub const ORCHESTRATION_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub run_timeout: Duration,
    pub parallel_runs: bool,
}

impl RunOptions {
    pub fn from_config(cfg: &SandboxConfig) -> Self {
        Self {
            run_timeout: cfg.timeout(),
            parallel_runs: cfg.parallel_runs,
        }
    }

    /// Outer deadline for the whole sandbox stage (both runs).
    pub fn sandbox_budget(&self) -> Duration {
        self.run_timeout * 2 + ORCHESTRATION_GRACE
    }
}

/// Outcome of [`Orchestrator::validate_and_record`].
#[derive(Debug, Clone)]
pub struct Recorded {
    pub verdict: ValidationVerdict,
    /// An earlier verdict for identical content was kept instead of re-running.
    pub reused: bool,
}

pub struct Orchestrator {
    analyzer: SafetyAnalyzer,
    executor: Arc<dyn PluginExecutor>,
    lookup: Arc<dyn VerdictLookup>,
    fixture: SampleFixture,
    options: RunOptions,
    fingerprint: String,
}

struct Progress {
    passed: ValidationStage,
    warnings: Vec<String>,
}

impl Orchestrator {
    pub fn new(
        analyzer: SafetyAnalyzer,
        executor: Arc<dyn PluginExecutor>,
        lookup: Arc<dyn VerdictLookup>,
        fixture: SampleFixture,
        options: RunOptions,
    ) -> Self {
        let fingerprint = engine_fingerprint(analyzer.policy(), &fixture, options.run_timeout, None);
        Self {
            analyzer,
            executor,
            lookup,
            fixture,
            options,
            fingerprint,
        }
    }

    /// Process sandbox, configured fixture and safety policy, with `registry`
    /// resolving dependencies.
    pub fn from_config(cfg: &EngineConfig, registry: Arc<Registry>) -> Result<Self> {
        let executor = ProcessSandbox::from_config(&cfg.sandbox).context("configure sandbox failed")?;
        let fixture = fixture_from_config(&cfg.fixture).context("load sample fixture failed")?;
        let policy = SafetyPolicy::with_extra_modules(cfg.safety.extra_allowed_modules.iter().cloned());
        let mut orchestrator = Self::new(
            SafetyAnalyzer::new(policy),
            Arc::new(executor),
            registry,
            fixture,
            RunOptions::from_config(&cfg.sandbox),
        );
        orchestrator.fingerprint = engine_fingerprint(
            orchestrator.analyzer.policy(),
            &orchestrator.fixture,
            orchestrator.options.run_timeout,
            Some(&cfg.sandbox),
        );
        Ok(orchestrator)
    }

    pub fn options(&self) -> RunOptions {
        self.options
    }

    pub fn fixture(&self) -> &SampleFixture {
        &self.fixture
    }

    /// Stamped on every verdict; see [`crate::engine_fingerprint`].
    pub fn engine_fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Run every stage and return the terminal verdict. Never fails: every
    /// stage failure becomes an INVALID verdict.
    pub async fn validate(&self, submission: &Submission) -> ValidationVerdict {
        let span = tracing::info_span!(
            "validate",
            plugin_id = %submission.id(),
            kind = %submission.kind()
        );
        async {
            let mut progress = Progress {
                passed: ValidationStage::Pending,
                warnings: Vec::new(),
            };
            let outcome = self.run_stages(submission, &mut progress).await;
            let verdict = match outcome {
                Ok(()) => ValidationVerdict::valid(
                    submission.id(),
                    submission.kind(),
                    submission.source_hash(),
                    progress.warnings,
                    Utc::now(),
                )
                .with_engine_fingerprint(self.fingerprint.as_str()),
                Err(failure) => ValidationVerdict::invalid(
                    submission.id(),
                    submission.kind(),
                    submission.source_hash(),
                    failure.code,
                    failure.reasons,
                    progress.warnings,
                    progress.passed,
                    Utc::now(),
                )
                .with_engine_fingerprint(self.fingerprint.as_str()),
            };
            info!(
                status = verdict.status.as_str(),
                error_code = ?verdict.error_code,
                last_passed_stage = verdict.last_passed_stage.as_str(),
                "validation finished"
            );
            verdict
        }
        .instrument(span)
        .await
    }

    async fn run_stages(&self, sub: &Submission, progress: &mut Progress) -> Result<(), StageFailure> {
        let manifest = validate_manifest(sub.manifest_yaml(), sub.kind(), sub.id())
            .map_err(|e| StageFailure::new(ErrorCode::SchemaInvalid, e.reasons()))?;
        advance(progress, ValidationStage::SchemaChecked);

        let report = self
            .analyzer
            .scan(sub.source())
            .map_err(|e| StageFailure::single(ErrorCode::SchemaInvalid, format!("SCHEMA_INVALID source: {e}")))?;
        if let Some(code) = report.primary_code() {
            return Err(StageFailure::new(code, report.reasons()));
        }
        advance(progress, ValidationStage::StaticallySafe);

        let spec = ExecutionSpec::new(&manifest, sub.source());
        let budget = self.options.sandbox_budget();
        let runs = tokio::time::timeout(
            budget,
            execute_twice(
                self.executor.as_ref(),
                &spec,
                &self.fixture,
                self.options.parallel_runs,
            ),
        )
        .await
        .map_err(|_| {
            StageFailure::single(
                ErrorCode::RuntimeTimeout,
                format!("sandbox stage exceeded its budget of {} ms", budget.as_millis()),
            )
        })?;
        check_sandbox_runs(&runs)?;
        advance(progress, ValidationStage::SandboxExecuted);

        let report = check_runs(&manifest, &runs)?;
        progress.warnings.extend(report.warnings);
        advance(progress, ValidationStage::DeterminismVerified);

        resolve_dependencies(&manifest, self.lookup.as_ref())?;
        advance(progress, ValidationStage::DependenciesResolved);
        Ok(())
    }

    /// Validate and persist, reusing a prior verdict for identical content
    /// under identical engine settings unless `force`. Errors only when the
    /// registry cannot be written.
    pub async fn validate_and_record(
        &self,
        submission: &Submission,
        registry: &Registry,
        force: bool,
    ) -> Result<Recorded> {
        if !force {
            if let Some(cached) = registry.cached_verdict(
                submission.kind(),
                submission.id(),
                submission.source_hash(),
                &self.fingerprint,
            ) {
                if self.cache_is_fresh(&cached, submission) {
                    info!(
                        plugin_id = %submission.id(),
                        kind = %submission.kind(),
                        status = cached.status.as_str(),
                        "verdict reused for unchanged submission"
                    );
                    return Ok(Recorded {
                        verdict: cached,
                        reused: true,
                    });
                }
            }
        }

        let verdict = self.validate(submission).await;
        registry.record(&verdict).with_context(|| {
            format!("record verdict failed for {}/{}", submission.kind(), submission.id())
        })?;
        Ok(Recorded {
            verdict,
            reused: false,
        })
    }

    /// A strategy's verdict also depends on its indicators; reuse it only if
    /// the dependency outcome is unchanged.
    fn cache_is_fresh(&self, cached: &ValidationVerdict, sub: &Submission) -> bool {
        if sub.kind() != PluginKind::Strategy {
            return true;
        }
        if !matches!(cached.error_code, None | Some(ErrorCode::DependencyMissing)) {
            return true;
        }
        let Ok(manifest) = validate_manifest(sub.manifest_yaml(), sub.kind(), sub.id()) else {
            return false;
        };
        resolve_dependencies(&manifest, self.lookup.as_ref()).is_ok() == cached.is_valid()
    }
}

/// One entry of a batch run.
#[derive(Debug)]
pub struct BatchItem {
    pub kind: PluginKind,
    pub id: String,
    pub result: Result<Recorded>,
}

/// Validate many submissions. Ids of one kind run in parallel (bounded by
/// `max_concurrent`); all indicators finish before any strategy starts so
/// dependencies see this batch's verdicts. Items come back in input order.
pub async fn validate_batch(
    orchestrator: Arc<Orchestrator>,
    registry: Arc<Registry>,
    submissions: Vec<Submission>,
    force: bool,
    max_concurrent: usize,
) -> Vec<BatchItem> {
    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut slots: Vec<Option<BatchItem>> = submissions.iter().map(|_| None).collect();

    for kind in PluginKind::ALL {
        let mut set = JoinSet::new();
        for (slot, sub) in submissions.iter().enumerate().filter(|(_, s)| s.kind() == kind) {
            let orchestrator = Arc::clone(&orchestrator);
            let registry = Arc::clone(&registry);
            let permits = Arc::clone(&permits);
            let sub = sub.clone();
            set.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => orchestrator.validate_and_record(&sub, &registry, force).await,
                    Err(e) => Err(anyhow::anyhow!("validation scheduler closed: {e}")),
                };
                (slot, BatchItem {
                    kind: sub.kind(),
                    id: sub.id().to_string(),
                    result,
                })
            });
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, item)) => slots[slot] = Some(item),
                Err(e) => tracing::error!(error = %e, "validation task failed to complete"),
            }
        }
    }

    slots
        .into_iter()
        .zip(&submissions)
        .map(|(item, sub)| {
            item.unwrap_or_else(|| BatchItem {
                kind: sub.kind(),
                id: sub.id().to_string(),
                result: Err(anyhow::anyhow!("validation task aborted")),
            })
        })
        .collect()
}

fn advance(progress: &mut Progress, stage: ValidationStage) {
    progress.passed = stage;
    info!(stage = stage.as_str(), "validation stage passed");
}

/// First failing run decides the code; every failing run is listed.
fn check_sandbox_runs(runs: &[SandboxExecutionResult; 2]) -> Result<(), StageFailure> {
    let mut code = None;
    let mut reasons = Vec::new();
    for run in runs {
        match (&run.error, &run.output) {
            (Some(err), _) => {
                code.get_or_insert(err.error_code());
                reasons.push(format!("run {}: {err}", run.run_index));
            }
            (None, None) => {
                code.get_or_insert(ErrorCode::RuntimeError);
                reasons.push(format!("run {}: RUNTIME_ERROR: no output", run.run_index));
            }
            (None, Some(_)) => {}
        }
    }
    match code {
        Some(code) => Err(StageFailure::new(code, reasons)),
        None => Ok(()),
    }
}

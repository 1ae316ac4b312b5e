//! scenario_runtime_oracle_decides_verdict
//!
//! GREEN when:
//! - Two runs that differ in one value yield NONDETERMINISTIC_OUTPUT with
//!   SANDBOX_EXECUTED as the last passed stage.
//! - An actionable intent inside the warmup window yields WARMUP_VIOLATION.
//! - Post-warmup NaN fails under nan_policy=error and only warns under
//!   nan_policy=propagate.
//! - A hung executor is cut off by the outer sandbox budget.
//! - Validating the same submission twice gives the same outcome.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mqk_safety::SafetyAnalyzer;
use mqk_sandbox::generate_fixture;
use mqk_schemas::{
    ErrorCode, Intent, PluginKind, PluginOutput, Submission, ValidationStage, VerdictStatus,
};
use mqk_validation::testing::{ScriptedExecutor, ScriptedRun, StaticLookup};
use mqk_validation::{Orchestrator, RunOptions};

const BARS: usize = 12;
const SOURCE: &str = "def compute(bars, params):\n    return bars.close\n";

fn indicator_manifest(nan_policy: &str) -> String {
    format!(
        "id: sma\nkind: indicator\nversion: \"1\"\ninputs: [close]\noutputs: [sma]\nwarmup_bars: 3\nnan_policy: {nan_policy}\n"
    )
}

const STRATEGY_MANIFEST: &str = r#"
id: cross
kind: strategy
version: "1"
warmup_bars: 5
nan_policy: error
intents: [HOLD, ENTER_LONG, EXIT_LONG]
"#;

fn series(xs: Vec<f64>) -> PluginOutput {
    PluginOutput::Indicator {
        series: BTreeMap::from([("sma".to_string(), xs)]),
    }
}

fn ramp() -> Vec<f64> {
    (0..BARS).map(|i| if i < 3 { f64::NAN } else { i as f64 }).collect()
}

fn orchestrator(exec: ScriptedExecutor, timeout: Duration) -> Orchestrator {
    Orchestrator::new(
        SafetyAnalyzer::default(),
        Arc::new(exec),
        Arc::new(StaticLookup::default()),
        generate_fixture(BARS, 7),
        RunOptions {
            run_timeout: timeout,
            parallel_runs: true,
        },
    )
}

fn indicator(nan_policy: &str) -> Submission {
    Submission::new("sma", PluginKind::Indicator, indicator_manifest(nan_policy), SOURCE)
}

#[tokio::test]
async fn deterministic_indicator_is_valid() {
    let orch = orchestrator(ScriptedExecutor::same(series(ramp())), Duration::from_secs(1));
    let v = orch.validate(&indicator("error")).await;
    assert_eq!(v.status, VerdictStatus::Valid, "{:?}", v.reasons);
    assert_eq!(v.last_passed_stage, ValidationStage::DependenciesResolved);
    assert!(v.is_consistent());
}

#[tokio::test]
async fn single_value_divergence_is_nondeterministic() {
    let mut other = ramp();
    other[7] = f64::from_bits(other[7].to_bits() + 1);
    let exec = ScriptedExecutor::new(
        ScriptedRun::Output(series(ramp())),
        ScriptedRun::Output(series(other)),
    );
    let v = orchestrator(exec, Duration::from_secs(1)).validate(&indicator("error")).await;
    assert_eq!(v.error_code, Some(ErrorCode::NondeterministicOutput));
    assert_eq!(v.last_passed_stage, ValidationStage::SandboxExecuted);
    assert!(v.reasons[0].contains("index 7 of output 'sma'"), "{:?}", v.reasons);
}

#[tokio::test]
async fn entry_inside_warmup_is_rejected() {
    let mut intents = vec![Intent::Hold; BARS];
    intents[3] = Intent::EnterLong;
    intents[8] = Intent::ExitLong;
    let sub = Submission::new("cross", PluginKind::Strategy, STRATEGY_MANIFEST, SOURCE);
    let orch = orchestrator(
        ScriptedExecutor::same(PluginOutput::Strategy { intents }),
        Duration::from_secs(1),
    );
    let v = orch.validate(&sub).await;
    assert_eq!(v.error_code, Some(ErrorCode::WarmupViolation));
    assert_eq!(v.last_passed_stage, ValidationStage::SandboxExecuted);
    assert!(v.reasons[0].contains("ENTER_LONG at index 3"), "{:?}", v.reasons);
}

#[tokio::test]
async fn post_warmup_nan_follows_policy() {
    let mut xs = ramp();
    xs[9] = f64::NAN;

    let orch = orchestrator(ScriptedExecutor::same(series(xs.clone())), Duration::from_secs(1));
    let v = orch.validate(&indicator("error")).await;
    assert_eq!(v.error_code, Some(ErrorCode::NanPolicyViolation));

    let orch = orchestrator(ScriptedExecutor::same(series(xs)), Duration::from_secs(1));
    let v = orch.validate(&indicator("propagate")).await;
    assert_eq!(v.status, VerdictStatus::Valid);
    assert_eq!(v.warnings.len(), 1);
    assert!(v.warnings[0].contains("first at index 9"));
}

#[tokio::test]
async fn run_failure_code_is_carried_through() {
    let exec = ScriptedExecutor::new(
        ScriptedRun::Output(series(ramp())),
        ScriptedRun::Fail(mqk_schemas::RunFailure::new(
            mqk_schemas::RunFailureKind::PluginRaised,
            "ZeroDivisionError at 2:5",
        )),
    );
    let v = orchestrator(exec, Duration::from_secs(1)).validate(&indicator("error")).await;
    assert_eq!(v.error_code, Some(ErrorCode::RuntimeError));
    assert_eq!(v.last_passed_stage, ValidationStage::StaticallySafe);
    assert_eq!(v.reasons.len(), 1);
    assert!(v.reasons[0].starts_with("run 1: RUNTIME_ERROR"), "{:?}", v.reasons);
}

#[tokio::test]
async fn hung_executor_hits_the_outer_budget() {
    let exec = ScriptedExecutor::new(ScriptedRun::Hang, ScriptedRun::Hang);
    let orch = orchestrator(exec, Duration::from_millis(100));
    let started = Instant::now();
    let v = orch.validate(&indicator("error")).await;
    let elapsed = started.elapsed();

    assert_eq!(v.error_code, Some(ErrorCode::RuntimeTimeout));
    assert!(v.reasons[0].contains("budget of 2200 ms"), "{:?}", v.reasons);
    assert!(elapsed >= Duration::from_millis(2200));
    assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");
}

#[tokio::test]
async fn validation_is_idempotent() {
    let mut other = ramp();
    other[4] = -1.0;
    let exec = ScriptedExecutor::new(
        ScriptedRun::Output(series(ramp())),
        ScriptedRun::Output(series(other)),
    );
    let orch = orchestrator(exec, Duration::from_secs(1));
    let sub = indicator("error");
    let first = orch.validate(&sub).await;
    let second = orch.validate(&sub).await;
    assert_eq!(first.status, second.status);
    assert_eq!(first.error_code, second.error_code);
    assert_eq!(first.reasons, second.reasons);
    assert_eq!(first.source_hash, second.source_hash);
}

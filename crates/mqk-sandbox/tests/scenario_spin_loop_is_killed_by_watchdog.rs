//! scenario_spin_loop_is_killed_by_watchdog
//!
//! GREEN when:
//! - A plugin that never returns is killed by the wall-clock watchdog.
//! - Both runs are classified RUNTIME_TIMEOUT (not RUNTIME_ERROR, not SIGXCPU).
//! - Each run resolves within timeout + a small epsilon.
//! - The kill is recorded (signal) rather than silently dropped.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use mqk_config::SandboxConfig;
use mqk_sandbox::{execute_twice, generate_fixture, ExecutionSpec, ProcessSandbox};
use mqk_schemas::{ErrorCode, PluginKind, RunFailureKind};

const SPIN: &str = "\
def compute(bars, params):
    n = 0
    while True:
        n = n + 1
";

fn spin_spec() -> ExecutionSpec {
    ExecutionSpec {
        kind: PluginKind::Indicator,
        source: SPIN.to_string(),
        params: BTreeMap::new(),
        inputs: Vec::new(),
        outputs: vec!["value".to_string()],
        intents: BTreeSet::new(),
    }
}

#[tokio::test]
async fn spin_loop_times_out_within_budget() {
    let cfg = SandboxConfig {
        timeout_secs: 0.5,
        ..SandboxConfig::default()
    };
    let sandbox = ProcessSandbox::new(env!("CARGO_BIN_EXE_mqk-sandbox-worker"), Vec::new(), &cfg);
    let fixture = generate_fixture(32, 1);

    let started = Instant::now();
    let runs = execute_twice(&sandbox, &spin_spec(), &fixture, true).await;
    let elapsed = started.elapsed();

    // Concurrent runs: the pair resolves in about one timeout.
    assert!(
        elapsed < Duration::from_millis(500) + Duration::from_secs(2),
        "took {elapsed:?}"
    );

    for run in &runs {
        let err = run.error.as_ref().expect("spin loop must fail");
        assert_eq!(err.kind, RunFailureKind::Timeout, "run {}: {err}", run.run_index);
        assert_eq!(err.error_code(), ErrorCode::RuntimeTimeout);
        assert!(err.detail.contains("500 ms"), "detail: {}", err.detail);
        assert!(run.output.is_none());
        assert!(run.wall_time_ms >= 500, "wall {}", run.wall_time_ms);
        #[cfg(unix)]
        assert_eq!(run.signal, Some(9), "watchdog kill must be recorded");
    }
    assert_eq!(runs[0].run_index, 0);
    assert_eq!(runs[1].run_index, 1);
}

#[tokio::test]
async fn sequential_runs_each_get_their_own_budget() {
    let cfg = SandboxConfig {
        timeout_secs: 0.3,
        parallel_runs: false,
        ..SandboxConfig::default()
    };
    let sandbox = ProcessSandbox::new(env!("CARGO_BIN_EXE_mqk-sandbox-worker"), Vec::new(), &cfg);
    let fixture = generate_fixture(8, 1);

    let started = Instant::now();
    let runs = execute_twice(&sandbox, &spin_spec(), &fixture, false).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(600), "took {elapsed:?}");
    assert!(elapsed < Duration::from_millis(600) + Duration::from_secs(3), "took {elapsed:?}");
    assert!(runs
        .iter()
        .all(|r| r.error.as_ref().map(|e| e.kind) == Some(RunFailureKind::Timeout)));
}

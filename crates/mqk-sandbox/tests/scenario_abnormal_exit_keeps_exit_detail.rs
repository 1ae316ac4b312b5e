//! scenario_abnormal_exit_keeps_exit_detail
//!
//! GREEN when:
//! - A worker that dies without writing a frame is RUNTIME_ERROR whose detail
//!   names the termination signal or exit code.
//! - A frame cut off mid-write is reported as truncated, not decoded.
//! - A plugin blowing through the memory ceiling is RUNTIME_ERROR (a resource
//!   kill), distinguishable from a timeout.
//! - Output past the configured cap is rejected.

#![cfg(unix)]

use std::collections::{BTreeMap, BTreeSet};

use mqk_config::SandboxConfig;
use mqk_sandbox::{generate_fixture, ExecutionSpec, PluginExecutor, ProcessSandbox};
use mqk_schemas::{ErrorCode, PluginKind, RunFailureKind};

fn spec(source: &str) -> ExecutionSpec {
    ExecutionSpec {
        kind: PluginKind::Indicator,
        source: source.to_string(),
        params: BTreeMap::new(),
        inputs: Vec::new(),
        outputs: vec!["value".to_string()],
        intents: BTreeSet::new(),
    }
}

fn shell(script: &str) -> ProcessSandbox {
    let cfg = SandboxConfig {
        timeout_secs: 5.0,
        ..SandboxConfig::default()
    };
    ProcessSandbox::new("/bin/sh", vec!["-c".to_string(), script.to_string()], &cfg)
}

#[tokio::test]
async fn killed_worker_records_signal() {
    let run = shell("kill -9 $$")
        .execute(&spec(""), &generate_fixture(4, 1), 0)
        .await;
    let err = run.error.expect("must fail");
    assert_eq!(err.error_code(), ErrorCode::RuntimeError);
    assert_eq!(err.kind, RunFailureKind::AbnormalExit);
    assert_eq!(run.signal, Some(9));
    assert!(run.exit_code.is_none());
    assert!(err.detail.contains("killed by signal 9"), "detail: {}", err.detail);
}

#[tokio::test]
async fn nonzero_exit_without_frame_records_code() {
    let run = shell("echo boom >&2; exit 7")
        .execute(&spec(""), &generate_fixture(4, 1), 0)
        .await;
    let err = run.error.expect("must fail");
    assert_eq!(err.kind, RunFailureKind::AbnormalExit);
    assert_eq!(run.exit_code, Some(7));
    assert!(err.detail.contains("no result frame"), "detail: {}", err.detail);
    assert!(err.detail.contains("exited with code 7"), "detail: {}", err.detail);
    assert!(err.detail.contains("stderr: boom"), "detail: {}", err.detail);
}

#[tokio::test]
async fn truncated_frame_is_not_decoded() {
    let run = shell(r#"printf 'MQKW1 400\n{"cpu_time_ms":1'; exit 0"#)
        .execute(&spec(""), &generate_fixture(4, 1), 0)
        .await;
    let err = run.error.expect("must fail");
    assert_eq!(err.kind, RunFailureKind::AbnormalExit);
    assert!(err.detail.contains("truncated"), "detail: {}", err.detail);
    assert!(err.detail.contains("exited with code 0"), "detail: {}", err.detail);
}

#[tokio::test]
async fn output_cap_is_enforced() {
    let cfg = SandboxConfig {
        max_output_bytes: 64,
        ..SandboxConfig::default()
    };
    let sandbox = ProcessSandbox::new(
        "/bin/sh",
        vec![
            "-c".to_string(),
            "i=0; while [ $i -lt 50 ]; do printf 'xxxxxxxxxx'; i=$((i+1)); done".to_string(),
        ],
        &cfg,
    );
    let run = sandbox.execute(&spec(""), &generate_fixture(4, 1), 0).await;
    let err = run.error.expect("must fail");
    assert_eq!(err.kind, RunFailureKind::OutputTooLarge);
    assert_eq!(err.error_code(), ErrorCode::RuntimeError);
}

#[tokio::test]
async fn memory_bomb_is_a_resource_kill_not_a_timeout() {
    let cfg = SandboxConfig {
        timeout_secs: 20.0,
        memory_limit_mb: 256,
        ..SandboxConfig::default()
    };
    let sandbox = ProcessSandbox::new(env!("CARGO_BIN_EXE_mqk-sandbox-worker"), Vec::new(), &cfg);
    let src = "\
def compute(bars, params):
    xs = [0.0]
    while True:
        xs = xs + xs
";
    let run = sandbox.execute(&spec(src), &generate_fixture(4, 1), 0).await;
    let err = run.error.expect("must fail");
    assert_eq!(err.error_code(), ErrorCode::RuntimeError, "detail: {}", err.detail);
    assert!(
        run.exit_code.is_some() || run.signal.is_some(),
        "exit detail must be recorded"
    );
    assert!(
        err.detail.contains("signal") || err.detail.contains("code"),
        "detail: {}",
        err.detail
    );
}

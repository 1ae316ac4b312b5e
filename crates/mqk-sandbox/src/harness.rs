//! Sandbox Execution Harness.
//!
//! Every run gets a fresh worker process: empty environment, piped stdio,
//! rlimits applied before exec, and an external wall-clock watchdog. The
//! result comes back over stdout as a length-prefixed frame; anything short
//! of a complete frame is a failure that carries the exit code and/or
//! signal. Workers are spawned kill-on-drop, so abandoning a validation
//! reclaims them.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use mqk_config::SandboxConfig;
use mqk_schemas::{
    InputField, Intent, KindContract, Manifest, ParamValue, PluginKind, PluginOutput,
    RunFailure, RunFailureKind, SampleFixture, SandboxExecutionResult,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::limits::ResourceLimits;
use crate::protocol::{decode_frame, FrameError, WorkerRequest, WorkerResult};
use crate::shape::check_shape;

/// Subcommand that puts the `mqk` binary into worker mode.
pub const WORKER_SUBCOMMAND: &str = "sandbox-worker";

/// Bytes of worker stderr kept for failure details.
const STDERR_CAP: u64 = 4 * 1024;

/// Everything a worker needs to run one plugin, taken from the validated
/// manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSpec {
    pub kind: PluginKind,
    pub source: String,
    pub params: BTreeMap<String, ParamValue>,
    pub inputs: Vec<InputField>,
    /// Declared indicator outputs (empty for strategies).
    pub outputs: Vec<String>,
    /// Declared strategy intents (empty for indicators).
    pub intents: BTreeSet<Intent>,
}

impl ExecutionSpec {
    pub fn new(manifest: &Manifest, source: &str) -> Self {
        let (inputs, outputs, intents) = match &manifest.contract {
            KindContract::Indicator { inputs, outputs } => {
                (inputs.clone(), outputs.clone(), BTreeSet::new())
            }
            KindContract::Strategy { intents, .. } => (Vec::new(), Vec::new(), intents.clone()),
        };
        Self {
            kind: manifest.kind(),
            source: source.to_string(),
            params: manifest.default_params(),
            inputs,
            outputs,
            intents,
        }
    }

    pub fn request(&self, fixture: &SampleFixture) -> WorkerRequest {
        WorkerRequest {
            kind: self.kind,
            source: self.source.clone(),
            params: self.params.clone(),
            inputs: self.inputs.clone(),
            fixture: fixture.clone(),
        }
    }
}

/// Runs a plugin once in isolation.
///
/// Implementations never return an error: every failure is folded into the
/// result's `error` field.
#[async_trait::async_trait]
pub trait PluginExecutor: Send + Sync {
    async fn execute(
        &self,
        spec: &ExecutionSpec,
        fixture: &SampleFixture,
        run_index: u8,
    ) -> SandboxExecutionResult;
}

/// Two independent, identically configured runs. Concurrency only changes
/// latency; the pair is always returned in run order.
pub async fn execute_twice(
    executor: &dyn PluginExecutor,
    spec: &ExecutionSpec,
    fixture: &SampleFixture,
    parallel: bool,
) -> [SandboxExecutionResult; 2] {
    if parallel {
        let (a, b) = tokio::join!(
            executor.execute(spec, fixture, 0),
            executor.execute(spec, fixture, 1)
        );
        [a, b]
    } else {
        let a = executor.execute(spec, fixture, 0).await;
        let b = executor.execute(spec, fixture, 1).await;
        [a, b]
    }
}

/// Process-per-run executor.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    limits: ResourceLimits,
    max_output_bytes: u64,
}

impl ProcessSandbox {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, cfg: &SandboxConfig) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: cfg.timeout(),
            limits: ResourceLimits::from_config(cfg),
            max_output_bytes: cfg.max_output_bytes,
        }
    }

    /// Configured worker program, or the running binary in worker mode.
    pub fn from_config(cfg: &SandboxConfig) -> Result<Self> {
        match &cfg.worker_program {
            Some(program) => Ok(Self::new(program, cfg.worker_args.clone(), cfg)),
            None => {
                let exe = std::env::current_exe().context("resolve current executable failed")?;
                Ok(Self::new(exe, vec![WORKER_SUBCOMMAND.to_string()], cfg))
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            let limits = self.limits;
            // SAFETY: the hook only calls setrlimit, which is async-signal-safe.
            unsafe {
                cmd.pre_exec(move || limits.apply());
            }
        }
        cmd
    }
}

#[async_trait::async_trait]
impl PluginExecutor for ProcessSandbox {
    async fn execute(
        &self,
        spec: &ExecutionSpec,
        fixture: &SampleFixture,
        run_index: u8,
    ) -> SandboxExecutionResult {
        let started = Instant::now();
        let mut run = RunRecord::new(run_index);

        let request = match serde_json::to_vec(&spec.request(fixture)) {
            Ok(r) => r,
            Err(e) => {
                return run.fail(
                    started,
                    RunFailure::new(RunFailureKind::SpawnFailed, format!("encode request failed: {e}")),
                )
            }
        };

        let mut child = match self.command().spawn() {
            Ok(c) => c,
            Err(e) => {
                return run.fail(
                    started,
                    RunFailure::new(
                        RunFailureKind::SpawnFailed,
                        format!("spawn {} failed: {e}", self.program.display()),
                    ),
                )
            }
        };
        debug!(run_index, pid = ?child.id(), "sandbox worker spawned");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let cap = self.max_output_bytes;

        let io = async {
            let feed = async move {
                if let Some(mut w) = stdin {
                    // A worker that dies early closes the pipe; its exit
                    // status reports why.
                    let _ = w.write_all(&request).await;
                    let _ = w.shutdown().await;
                }
            };
            let (_, out, err, status) = tokio::join!(
                feed,
                read_capped(stdout, cap),
                read_capped(stderr, STDERR_CAP),
                child.wait()
            );
            (out, err, status)
        };
        let outcome = tokio::time::timeout(self.timeout, io).await;

        let ((stdout, over_cap), (stderr, _), status) = match outcome {
            Ok(done) => done,
            Err(_) => {
                let _ = child.start_kill();
                if let Ok(status) = child.wait().await {
                    run.record_exit(&status);
                }
                let detail = format!(
                    "wall-clock budget of {} ms exceeded; worker killed ({})",
                    self.timeout.as_millis(),
                    run.describe_exit()
                );
                return run.fail(started, RunFailure::new(RunFailureKind::Timeout, detail));
            }
        };

        let status = match status {
            Ok(s) => s,
            Err(e) => {
                return run.fail(
                    started,
                    RunFailure::new(RunFailureKind::AbnormalExit, format!("wait for worker failed: {e}")),
                )
            }
        };
        run.record_exit(&status);
        let stderr_note = stderr_note(&stderr);

        if over_cap {
            let detail = format!(
                "worker output exceeded {cap} bytes ({}){stderr_note}",
                run.describe_exit()
            );
            return run.fail(started, RunFailure::new(RunFailureKind::OutputTooLarge, detail));
        }

        let resp = match decode_frame(&stdout) {
            Ok(resp) => resp,
            Err(e) => {
                let kind = match e {
                    FrameError::Empty | FrameError::Truncated { .. } => RunFailureKind::AbnormalExit,
                    _ => RunFailureKind::MalformedPayload,
                };
                let detail = format!("{e}; worker {}{stderr_note}", run.describe_exit());
                return run.fail(started, RunFailure::new(kind, detail));
            }
        };
        run.cpu_time_ms = Some(resp.cpu_time_ms);
        run.peak_memory_kb = Some(resp.peak_rss_kb);

        let outcome = match resp.result {
            WorkerResult::PluginError { message } => Err(RunFailure::new(
                RunFailureKind::PluginRaised,
                format!("{message} (worker {})", run.describe_exit()),
            )),
            WorkerResult::ShapeError { message } => {
                Err(RunFailure::new(RunFailureKind::ShapeMismatch, message))
            }
            WorkerResult::Ok { .. } if !status.success() => Err(RunFailure::new(
                RunFailureKind::AbnormalExit,
                format!("worker reported a result but {}", run.describe_exit()),
            )),
            WorkerResult::Ok { output } => check_shape(spec, output, fixture.len()),
        };
        match outcome {
            Ok(output) => run.succeed(started, output),
            Err(failure) => run.fail(started, failure),
        }
    }
}

async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, cap: u64) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let Some(mut reader) = reader else {
        return (buf, false);
    };
    // Read errors end the stream; whatever arrived is judged as-is.
    let _ = (&mut reader).take(cap.saturating_add(1)).read_to_end(&mut buf).await;
    let over = buf.len() as u64 > cap;
    if over {
        // Keep draining so the worker never blocks on a full pipe.
        let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
    }
    buf.truncate(cap as usize);
    (buf, over)
}

fn stderr_note(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        String::new()
    } else {
        format!("; stderr: {text}")
    }
}

/// Accumulates the facts of one run until it resolves.
struct RunRecord {
    run_index: u8,
    exit_code: Option<i32>,
    signal: Option<i32>,
    cpu_time_ms: Option<u64>,
    peak_memory_kb: Option<u64>,
}

impl RunRecord {
    fn new(run_index: u8) -> Self {
        Self {
            run_index,
            exit_code: None,
            signal: None,
            cpu_time_ms: None,
            peak_memory_kb: None,
        }
    }

    fn record_exit(&mut self, status: &ExitStatus) {
        self.exit_code = status.code();
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            self.signal = status.signal();
        }
    }

    fn describe_exit(&self) -> String {
        match (self.exit_code, self.signal) {
            (Some(code), _) => format!("exited with code {code}"),
            (None, Some(sig)) => format!("killed by signal {sig}{}", signal_name(sig)),
            (None, None) => "exit status unknown".to_string(),
        }
    }

    fn succeed(self, started: Instant, output: PluginOutput) -> SandboxExecutionResult {
        self.finish(started, Some(output), None)
    }

    fn fail(self, started: Instant, failure: RunFailure) -> SandboxExecutionResult {
        warn!(
            run_index = self.run_index,
            exit_code = ?self.exit_code,
            signal = ?self.signal,
            error_code = %failure.error_code(),
            detail = %failure.detail,
            "sandbox run failed"
        );
        self.finish(started, None, Some(failure))
    }

    fn finish(
        self,
        started: Instant,
        output: Option<PluginOutput>,
        error: Option<RunFailure>,
    ) -> SandboxExecutionResult {
        SandboxExecutionResult {
            run_index: self.run_index,
            exit_code: self.exit_code,
            signal: self.signal,
            wall_time_ms: started.elapsed().as_millis() as u64,
            cpu_time_ms: self.cpu_time_ms,
            peak_memory_kb: self.peak_memory_kb,
            output,
            error,
        }
    }
}

#[cfg(unix)]
fn signal_name(sig: i32) -> &'static str {
    match sig {
        libc::SIGKILL => " (SIGKILL)",
        libc::SIGSEGV => " (SIGSEGV)",
        libc::SIGABRT => " (SIGABRT)",
        libc::SIGXCPU => " (SIGXCPU)",
        libc::SIGXFSZ => " (SIGXFSZ)",
        libc::SIGTERM => " (SIGTERM)",
        _ => "",
    }
}

#[cfg(not(unix))]
fn signal_name(_sig: i32) -> &'static str {
    ""
}

//! mqk-sandbox
//!
//! Sandbox Execution Harness: runs a statically-safe plugin twice, each time
//! in a fresh resource-limited worker process, and collects the results over
//! a length-prefixed byte-stream frame.
//!
//! - [`harness`] — [`PluginExecutor`] seam, [`ProcessSandbox`], [`execute_twice`].
//! - [`worker`] — the code that runs inside the worker process.
//! - [`protocol`] — request/response wire format.
//! - [`fixture`] — deterministic sample fixture.

pub mod fixture;
pub mod harness;
pub mod limits;
pub mod protocol;
pub mod shape;
pub mod worker;

pub use fixture::{fixture_from_config, generate_fixture, load_fixture};
pub use harness::{execute_twice, ExecutionSpec, PluginExecutor, ProcessSandbox, WORKER_SUBCOMMAND};
pub use limits::{cpu_ceiling_secs, ResourceLimits};
pub use worker::worker_main;

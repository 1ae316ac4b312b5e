//! mqk-validation
//!
//! Plugin Validation Engine pipeline: manifest check, static safety scan,
//! dual sandbox execution, determinism & policy oracle and dependency
//! resolution, sequenced by [`Orchestrator`] into one terminal verdict.
//!
//! Nothing here executes plugin code in-process; execution goes through the
//! [`mqk_sandbox::PluginExecutor`] seam.

mod deps;
mod fingerprint;
mod orchestrator;
mod policy;
mod stage;
mod submissions;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use deps::{resolve_dependencies, VerdictLookup};
pub use fingerprint::engine_fingerprint;
pub use orchestrator::{
    validate_batch, BatchItem, Orchestrator, Recorded, RunOptions, ORCHESTRATION_GRACE,
};
pub use policy::{check_determinism, check_nan_policy, check_runs, check_warmup, PolicyReport};
pub use stage::StageFailure;
pub use submissions::{
    discover_submissions, load_submission, submission_dir, MANIFEST_FILE, SOURCE_FILE,
};

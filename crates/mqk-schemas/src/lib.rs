//! mqk-schemas
//!
//! Shared data model for the plugin validation engine. Every other crate in
//! the workspace speaks these types; nothing here performs I/O.
//!
//! - [`Submission`] — untrusted manifest + source for one plugin id.
//! - [`Manifest`] — normalized manifest produced by `mqk-manifest`.
//! - [`SafetyScanReport`] — output of the static safety analyzer.
//! - [`SandboxExecutionResult`] — one isolated execution of a plugin.
//! - [`ValidationVerdict`] — terminal VALID/INVALID outcome persisted by the registry.

mod fixture;
mod manifest;
mod report;
mod submission;
mod verdict;

pub use fixture::*;
pub use manifest::*;
pub use report::*;
pub use submission::*;
pub use verdict::*;

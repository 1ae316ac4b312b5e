//! mqk-safety
//!
//! Static safety analysis of plugin sources.
//!
//! The analyzer is language-independent: a [`SyntaxFrontend`] lowers source
//! into [`StructuralNode`]s (import, call, attribute access, assignment) and
//! [`SafetyAnalyzer`] applies allow/deny rules to each node. The scan is
//! purely structural, so it terminates in time linear in the source and
//! cannot be steered by runtime branching. Determined obfuscation is a known
//! limitation, not a bug.
//!
//! Violation kinds map to verdict codes via `ViolationKind::error_code`:
//! imports to `FORBIDDEN_IMPORT`, calls and introspection attributes to
//! `FORBIDDEN_CALL`, monkey-patching and outer-scope writes to
//! `GLOBAL_STATE_DETECTED`.

mod analyzer;
mod frontend;
mod node;
mod policy;

pub use analyzer::SafetyAnalyzer;
pub use frontend::{FrontendError, ScriptFrontend, SyntaxFrontend};
pub use node::{Binding, StructuralNode, TargetShape};
pub use policy::{SafetyPolicy, DEFAULT_ALLOWED_MODULES, DENIED_ATTRIBUTES, DENIED_CALLS};

//! mqk-artifacts
//!
//! Artifact registry for plugin verdicts:
//!
//! ```text
//! <registry_root>/
//!   index.json
//!   index.lock          advisory writer lock
//!   indicator/<id>.json
//!   strategy/<id>.json
//! ```
//!
//! The registry is the only source of truth for plugin status. Consumers
//! read it through [`Registry::lookup`], [`Registry::active`] and
//! [`Registry::failed`] and never re-run a plugin to find out.

mod atomic;
mod index;
mod lock;
mod registry;

pub use index::{index_key, IndexEntry, RegistryIndex, INDEX_FILE, INDEX_SCHEMA_VERSION};
pub use lock::LOCK_FILE;
pub use registry::{PluginStatus, Registry, RegistryError, RegistryLookup};

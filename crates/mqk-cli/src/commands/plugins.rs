//! `mqk plugins ...`: validation runs and registry listings.
//!
//! Output is one `key=value` line per plugin on stdout; logs go to stderr.
//! Validity lives in the verdicts. The exit code only says whether every
//! requested submission ended with a recorded verdict.

use std::sync::Arc;

use anyhow::{Context, Result};
use mqk_artifacts::{PluginStatus, Registry};
use mqk_config::EngineConfig;
use mqk_schemas::PluginKind;
use mqk_validation::{
    discover_submissions, load_submission, validate_batch, BatchItem, Orchestrator,
};
use tracing::{error, info};

use super::parse_kind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    One { kind: PluginKind, id: String },
    All,
}

impl Target {
    pub fn from_args(kind: Option<&str>, id: Option<&str>, all: bool) -> Result<Self> {
        match (kind, id, all) {
            (None, None, true) => Ok(Target::All),
            (Some(kind), Some(id), false) => Ok(Target::One {
                kind: parse_kind(kind)?,
                id: id.to_string(),
            }),
            _ => anyhow::bail!("specify either --kind and --id, or --all"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    All,
    Active,
    Failed,
}

pub async fn validate(cfg: &EngineConfig, target: Target, force: bool, jobs: usize) -> Result<()> {
    let registry = Arc::new(Registry::open(&cfg.paths.registry_root)?);
    let orchestrator = Arc::new(Orchestrator::from_config(cfg, Arc::clone(&registry))?);
    let root = &cfg.paths.submissions_root;

    let requested = match target {
        Target::One { kind, id } => vec![(kind, id)],
        Target::All => discover_submissions(root)?,
    };
    if requested.is_empty() {
        info!(root = %root.display(), "no submissions found");
        println!("validated=0 valid=0 invalid=0 unresolved=0");
        return Ok(());
    }

    let mut unresolved = 0usize;
    let mut submissions = Vec::with_capacity(requested.len());
    for (kind, id) in requested {
        match load_submission(root, kind, &id) {
            Ok(sub) => submissions.push(sub),
            Err(e) => {
                unresolved += 1;
                error!(kind = %kind, id = %id, error = %format!("{e:#}"), "submission could not be loaded");
                println!("plugin={}/{} resolved=false error={:#}", kind, id, e);
            }
        }
    }

    let items = validate_batch(orchestrator, registry, submissions, force, jobs).await;

    let (mut valid, mut invalid) = (0usize, 0usize);
    for item in &items {
        match &item.result {
            Ok(rec) => {
                if rec.verdict.is_valid() {
                    valid += 1;
                } else {
                    invalid += 1;
                }
                println!("{}", verdict_line(item));
            }
            Err(e) => {
                unresolved += 1;
                println!("plugin={}/{} resolved=false error={:#}", item.kind, item.id, e);
            }
        }
    }

    println!(
        "validated={} valid={} invalid={} unresolved={}",
        valid + invalid,
        valid,
        invalid,
        unresolved
    );
    if unresolved > 0 {
        anyhow::bail!("{unresolved} submission(s) did not resolve to a recorded verdict");
    }
    Ok(())
}

fn verdict_line(item: &BatchItem) -> String {
    let Ok(rec) = &item.result else {
        return format!("plugin={}/{} resolved=false", item.kind, item.id);
    };
    let v = &rec.verdict;
    let mut line = format!(
        "plugin={}/{} status={} error_code={} reused={}",
        item.kind,
        item.id,
        v.status.as_str(),
        v.error_code.map(|c| c.as_str()).unwrap_or("-"),
        rec.reused
    );
    if let Some(reason) = v.primary_reason() {
        line.push_str(&format!(" reason={reason}"));
    }
    line
}

pub fn list(cfg: &EngineConfig, filter: ListFilter, json: bool) -> Result<()> {
    let registry = Registry::open(&cfg.paths.registry_root)?;
    let rows = match filter {
        ListFilter::All => registry.status(),
        ListFilter::Active => registry.active(),
        ListFilter::Failed => registry.failed(),
    };

    if json {
        let out = serde_json::to_string_pretty(&rows).context("serialize plugin status failed")?;
        println!("{out}");
        return Ok(());
    }
    for row in &rows {
        println!("{}", status_line(row));
    }
    Ok(())
}

fn status_line(row: &PluginStatus) -> String {
    let mut line = format!(
        "plugin={}/{} status={} error_code={} checked_at={}",
        row.kind,
        row.id,
        row.status.as_str(),
        row.error_code.map(|c| c.as_str()).unwrap_or("-"),
        row.checked_at.map(|t| t.to_rfc3339()).unwrap_or_default()
    );
    if let Some(reason) = &row.reason {
        line.push_str(&format!(" reason={reason}"));
    }
    line
}

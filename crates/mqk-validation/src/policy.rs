//! Determinism & Policy Checker.
//!
//! Determinism is exact: every value of run 0 must equal run 1 bit for bit
//! (two NaNs count as equal, whatever their payload). No tolerance is
//! applied; a plugin whose output wobbles in the last ulp is rejected.

use mqk_schemas::{ErrorCode, Manifest, NanPolicy, PluginOutput, SandboxExecutionResult};
use tracing::warn;

use crate::stage::StageFailure;

/// Non-fatal findings from a passing check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyReport {
    pub warnings: Vec<String>,
}

/// Determinism, then warmup, then NaN policy. First failure wins.
pub fn check_runs(
    manifest: &Manifest,
    runs: &[SandboxExecutionResult; 2],
) -> Result<PolicyReport, StageFailure> {
    let (a, b) = match (&runs[0].output, &runs[1].output) {
        (Some(a), Some(b)) if runs[0].error.is_none() && runs[1].error.is_none() => (a, b),
        _ => {
            return Err(StageFailure::single(
                ErrorCode::RuntimeError,
                "determinism check requires two successful runs",
            ))
        }
    };

    check_determinism(a, b)?;
    let warmup = manifest.warmup_bars as usize;
    check_warmup(a, warmup)?;
    let warnings = check_nan_policy(a, warmup, manifest.nan_policy)?;
    Ok(PolicyReport { warnings })
}

pub fn check_determinism(a: &PluginOutput, b: &PluginOutput) -> Result<(), StageFailure> {
    let diverged = |reason: String| StageFailure::single(ErrorCode::NondeterministicOutput, reason);

    match (a, b) {
        (PluginOutput::Indicator { series: sa }, PluginOutput::Indicator { series: sb }) => {
            if !sa.keys().eq(sb.keys()) {
                return Err(diverged("runs returned different output series".to_string()));
            }
            let mut reasons = Vec::new();
            for (name, xs) in sa {
                let ys = &sb[name];
                if xs.len() != ys.len() {
                    reasons.push(format!(
                        "output '{name}' length differs between runs ({} vs {})",
                        xs.len(),
                        ys.len()
                    ));
                    continue;
                }
                let mut differing = xs
                    .iter()
                    .zip(ys)
                    .enumerate()
                    .filter(|(_, (x, y))| !same_value(**x, **y));
                if let Some((i, (x, y))) = differing.next() {
                    let more = differing.count();
                    reasons.push(format!(
                        "runs diverge at index {i} of output '{name}': {x:?} vs {y:?} ({} of {} values differ)",
                        more + 1,
                        xs.len()
                    ));
                }
            }
            if reasons.is_empty() {
                Ok(())
            } else {
                Err(StageFailure::new(ErrorCode::NondeterministicOutput, reasons))
            }
        }
        (PluginOutput::Strategy { intents: ia }, PluginOutput::Strategy { intents: ib }) => {
            if ia.len() != ib.len() {
                return Err(diverged(format!(
                    "intent count differs between runs ({} vs {})",
                    ia.len(),
                    ib.len()
                )));
            }
            match ia.iter().zip(ib).position(|(x, y)| x != y) {
                Some(i) => Err(diverged(format!(
                    "runs diverge at index {i}: {} vs {}",
                    ia[i].as_str(),
                    ib[i].as_str()
                ))),
                None => Ok(()),
            }
        }
        _ => Err(diverged("runs returned different output kinds".to_string())),
    }
}

/// Strategies may only HOLD inside the warmup window. Indicators may emit
/// NaN placeholders there, so nothing to check.
pub fn check_warmup(output: &PluginOutput, warmup_bars: usize) -> Result<(), StageFailure> {
    let PluginOutput::Strategy { intents } = output else {
        return Ok(());
    };
    let mut early = intents
        .iter()
        .take(warmup_bars)
        .enumerate()
        .filter(|(_, intent)| intent.is_actionable());
    match early.next() {
        Some((i, intent)) => {
            let more = early.count();
            let mut reason = format!(
                "intent {} at index {i} is inside the warmup window (warmup_bars={warmup_bars})",
                intent.as_str()
            );
            if more > 0 {
                reason.push_str(&format!("; {more} more actionable intent(s) in warmup"));
            }
            Err(StageFailure::single(ErrorCode::WarmupViolation, reason))
        }
        None => Ok(()),
    }
}

/// Post-warmup NaN: a failure under `error` and `fill`, a warning under
/// `propagate`. The checker never fills values itself.
pub fn check_nan_policy(
    output: &PluginOutput,
    warmup_bars: usize,
    policy: NanPolicy,
) -> Result<Vec<String>, StageFailure> {
    let PluginOutput::Indicator { series } = output else {
        return Ok(Vec::new());
    };

    let mut findings = Vec::new();
    for (name, xs) in series {
        let mut nans = xs
            .iter()
            .enumerate()
            .skip(warmup_bars)
            .filter(|(_, x)| x.is_nan());
        if let Some((first, _)) = nans.next() {
            let count = nans.count() + 1;
            findings.push(format!(
                "output '{name}' has {count} NaN value(s) after warmup, first at index {first} (nan_policy={})",
                policy.as_str()
            ));
        }
    }

    match policy {
        NanPolicy::Propagate => {
            for w in &findings {
                warn!(finding = %w, "NaN after warmup tolerated by nan_policy=propagate");
            }
            Ok(findings)
        }
        NanPolicy::Fill | NanPolicy::Error if !findings.is_empty() => {
            Err(StageFailure::new(ErrorCode::NanPolicyViolation, findings))
        }
        NanPolicy::Fill | NanPolicy::Error => Ok(Vec::new()),
    }
}

fn same_value(x: f64, y: f64) -> bool {
    x.to_bits() == y.to_bits() || (x.is_nan() && y.is_nan())
}

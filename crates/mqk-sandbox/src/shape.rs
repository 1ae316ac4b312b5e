use std::collections::BTreeMap;

use mqk_schemas::{Intent, PluginOutput, PluginKind, RunFailure, RunFailureKind};

use crate::harness::ExecutionSpec;
use crate::protocol::RawOutput;

/// Check a decoded worker output against the declared contract and the
/// fixture length.
///
/// Indicator: a bare list is accepted only when exactly one output is
/// declared; a dict must carry exactly the declared output names. Every
/// series is aligned to the fixture. Strategy: one declared intent per
/// sample.
pub fn check_shape(
    spec: &ExecutionSpec,
    raw: RawOutput,
    fixture_len: usize,
) -> Result<PluginOutput, RunFailure> {
    let mismatch = |detail: String| RunFailure::new(RunFailureKind::ShapeMismatch, detail);

    match (spec.kind, raw) {
        (PluginKind::Indicator, RawOutput::Series { bits }) => {
            let [name] = spec.outputs.as_slice() else {
                return Err(mismatch(format!(
                    "indicator returned a single list but declares {} outputs; return a dict",
                    spec.outputs.len()
                )));
            };
            let series = check_len(name, bits, fixture_len).map_err(mismatch)?;
            Ok(PluginOutput::Indicator {
                series: BTreeMap::from([(name.clone(), series)]),
            })
        }
        (PluginKind::Indicator, RawOutput::Columns { mut columns }) => {
            let mut series = BTreeMap::new();
            for name in &spec.outputs {
                let bits = columns
                    .remove(name)
                    .ok_or_else(|| mismatch(format!("declared output '{name}' is missing")))?;
                series.insert(name.clone(), check_len(name, bits, fixture_len).map_err(mismatch)?);
            }
            if let Some(extra) = columns.keys().next() {
                return Err(mismatch(format!("undeclared output '{extra}'")));
            }
            Ok(PluginOutput::Indicator { series })
        }
        (PluginKind::Strategy, RawOutput::Intents { values }) => {
            if values.len() != fixture_len {
                return Err(mismatch(format!(
                    "strategy returned {} intents for {} samples",
                    values.len(),
                    fixture_len
                )));
            }
            let intents = values
                .iter()
                .enumerate()
                .map(|(i, v)| match Intent::parse(v) {
                    Some(intent) if spec.intents.contains(&intent) => Ok(intent),
                    Some(_) => Err(mismatch(format!("intent[{i}] '{v}' is not declared"))),
                    None => Err(mismatch(format!("intent[{i}] '{v}' is not a known intent"))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(PluginOutput::Strategy { intents })
        }
        (kind, _) => Err(mismatch(format!("output does not match {kind} output shape"))),
    }
}

fn check_len(name: &str, bits: Vec<u64>, fixture_len: usize) -> Result<Vec<f64>, String> {
    if bits.len() != fixture_len {
        return Err(format!(
            "output '{name}' has {} values for {} samples",
            bits.len(),
            fixture_len
        ));
    }
    Ok(bits.into_iter().map(f64::from_bits).collect())
}

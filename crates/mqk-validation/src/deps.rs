//! Dependency Resolver: every indicator a strategy requires must already
//! hold an intact VALID verdict.

use mqk_artifacts::{Registry, RegistryLookup};
use mqk_schemas::{ErrorCode, Manifest, PluginKind};

use crate::stage::StageFailure;

/// Read side of the registry, as seen by the resolver.
pub trait VerdictLookup: Send + Sync {
    fn lookup(&self, kind: PluginKind, id: &str) -> RegistryLookup;
}

impl VerdictLookup for Registry {
    fn lookup(&self, kind: PluginKind, id: &str) -> RegistryLookup {
        Registry::lookup(self, kind, id)
    }
}

/// All unresolved dependencies are reported, in declaration order.
pub fn resolve_dependencies(
    manifest: &Manifest,
    lookup: &dyn VerdictLookup,
) -> Result<(), StageFailure> {
    let reasons: Vec<String> = manifest
        .required_indicators()
        .iter()
        .filter_map(|id| match lookup.lookup(PluginKind::Indicator, id) {
            RegistryLookup::Valid(_) => None,
            RegistryLookup::Invalid(v) => Some(format!(
                "dependency indicator '{id}' is INVALID ({})",
                v.error_code.map(|c| c.as_str()).unwrap_or("no code")
            )),
            RegistryLookup::Missing => Some(format!("dependency indicator '{id}' has no verdict")),
            RegistryLookup::Malformed(e) => {
                Some(format!("dependency indicator '{id}' verdict unusable: {e}"))
            }
        })
        .collect();

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(StageFailure::new(ErrorCode::DependencyMissing, reasons))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticLookup;
    use mqk_schemas::{Intent, KindContract, NanPolicy};
    use std::collections::BTreeSet;

    fn strategy(requires: &[&str]) -> Manifest {
        Manifest {
            id: "x".to_string(),
            name: None,
            version: "1".to_string(),
            description: None,
            params: Vec::new(),
            warmup_bars: 0,
            nan_policy: NanPolicy::Error,
            contract: KindContract::Strategy {
                requires: requires.iter().map(|s| s.to_string()).collect(),
                intents: BTreeSet::from([Intent::Hold]),
            },
        }
    }

    #[test]
    fn every_unresolved_id_is_named_in_order() {
        let lookup = StaticLookup::default()
            .with_valid("sma")
            .with_invalid("rsi", ErrorCode::RuntimeTimeout);
        let err = resolve_dependencies(&strategy(&["sma", "rsi", "ema"]), &lookup).unwrap_err();
        assert_eq!(err.code, ErrorCode::DependencyMissing);
        assert_eq!(
            err.reasons,
            vec![
                "dependency indicator 'rsi' is INVALID (RUNTIME_TIMEOUT)".to_string(),
                "dependency indicator 'ema' has no verdict".to_string(),
            ]
        );
    }

    #[test]
    fn no_requirements_always_resolves() {
        assert!(resolve_dependencies(&strategy(&[]), &StaticLookup::default()).is_ok());
    }
}

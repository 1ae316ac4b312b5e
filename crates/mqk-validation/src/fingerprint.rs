//! Engine fingerprint: digest over every setting that can change the verdict
//! for unchanged submission content. A recorded verdict is only reused under
//! the fingerprint it was reached with.

use std::time::Duration;

use mqk_config::SandboxConfig;
use mqk_safety::SafetyPolicy;
use mqk_schemas::SampleFixture;
use sha2::{Digest, Sha256};

const FINGERPRINT_DOMAIN: &[u8] = b"mqk-engine-fingerprint-v1";

/// `sha256:<hex>` over the import allow-list, the fixture bits, the run
/// timeout and, when known, the sandbox resource limits.
pub fn engine_fingerprint(
    policy: &SafetyPolicy,
    fixture: &SampleFixture,
    run_timeout: Duration,
    sandbox: Option<&SandboxConfig>,
) -> String {
    let mut h = Sha256::new();
    h.update(FINGERPRINT_DOMAIN);

    let modules: Vec<&str> = policy.allowed_modules().collect();
    h.update((modules.len() as u64).to_be_bytes());
    for m in modules {
        h.update((m.len() as u64).to_be_bytes());
        h.update(m.as_bytes());
    }

    for col in [&fixture.open, &fixture.high, &fixture.low, &fixture.close, &fixture.volume] {
        h.update((col.len() as u64).to_be_bytes());
        for v in col {
            h.update(v.to_bits().to_be_bytes());
        }
    }

    h.update((run_timeout.as_millis() as u64).to_be_bytes());

    match sandbox {
        Some(cfg) => {
            h.update([1u8]);
            h.update(cfg.memory_limit_mb.to_be_bytes());
            h.update(cfg.max_output_bytes.to_be_bytes());
        }
        None => h.update([0u8]),
    }

    format!("sha256:{}", hex::encode(h.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqk_sandbox::generate_fixture;

    fn base() -> String {
        engine_fingerprint(
            &SafetyPolicy::default(),
            &generate_fixture(8, 1),
            Duration::from_secs(5),
            Some(&SandboxConfig::default()),
        )
    }

    #[test]
    fn same_settings_same_fingerprint() {
        assert_eq!(base(), base());
        assert!(base().starts_with("sha256:"));
    }

    #[test]
    fn every_verdict_input_moves_the_fingerprint() {
        let fx = generate_fixture(8, 1);
        let t = Duration::from_secs(5);
        let sb = SandboxConfig::default();

        let lenient = SafetyPolicy::with_extra_modules(["stats"]);
        assert_ne!(base(), engine_fingerprint(&lenient, &fx, t, Some(&sb)));

        let other_fixture = generate_fixture(8, 2);
        assert_ne!(
            base(),
            engine_fingerprint(&SafetyPolicy::default(), &other_fixture, t, Some(&sb))
        );

        assert_ne!(
            base(),
            engine_fingerprint(&SafetyPolicy::default(), &fx, Duration::from_secs(1), Some(&sb))
        );

        let tight = SandboxConfig {
            memory_limit_mb: 64,
            ..SandboxConfig::default()
        };
        assert_ne!(base(), engine_fingerprint(&SafetyPolicy::default(), &fx, t, Some(&tight)));
        assert_ne!(base(), engine_fingerprint(&SafetyPolicy::default(), &fx, t, None));
    }

    #[test]
    fn worker_scheduling_does_not_move_the_fingerprint() {
        let serial = SandboxConfig {
            parallel_runs: false,
            ..SandboxConfig::default()
        };
        let fp = engine_fingerprint(
            &SafetyPolicy::default(),
            &generate_fixture(8, 1),
            Duration::from_secs(5),
            Some(&serial),
        );
        assert_eq!(base(), fp);
    }
}

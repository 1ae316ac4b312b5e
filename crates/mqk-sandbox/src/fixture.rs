//! Sample fixture handed identically to both sandbox runs.
//!
//! Generated fixtures are a pure function of `(bars, seed)`: the random walk
//! draws from SHA-256 in counter mode, so no clock or OS entropy is involved
//! and the same config always yields the same bytes.

use std::path::Path;

use anyhow::{bail, Context, Result};
use mqk_config::FixtureConfig;
use mqk_schemas::SampleFixture;
use sha2::{Digest, Sha256};

const START_PRICE: f64 = 100.0;
const MAX_STEP: f64 = 0.02;
const MAX_WICK: f64 = 0.005;

/// Load the configured fixture file, or generate one.
pub fn fixture_from_config(cfg: &FixtureConfig) -> Result<SampleFixture> {
    match &cfg.path {
        Some(path) => load_fixture(path),
        None => Ok(generate_fixture(cfg.bars, cfg.seed)),
    }
}

/// Deterministic synthetic OHLCV series of `bars` samples.
pub fn generate_fixture(bars: usize, seed: u64) -> SampleFixture {
    let mut fx = SampleFixture {
        open: Vec::with_capacity(bars),
        high: Vec::with_capacity(bars),
        low: Vec::with_capacity(bars),
        close: Vec::with_capacity(bars),
        volume: Vec::with_capacity(bars),
    };

    let mut prev = START_PRICE;
    for i in 0..bars as u64 {
        let [step, up_wick, down_wick, vol] = draws(seed, i);
        let open = prev;
        let close = round4(open * (1.0 + (step - 0.5) * 2.0 * MAX_STEP));
        let high = round4(open.max(close) * (1.0 + up_wick * MAX_WICK));
        let low = round4(open.min(close) * (1.0 - down_wick * MAX_WICK));
        let volume = (1_000.0 + vol * 9_000.0).round();

        fx.open.push(open);
        fx.high.push(high);
        fx.low.push(low);
        fx.close.push(close);
        fx.volume.push(volume);
        prev = close;
    }
    fx
}

/// Read a fixture from JSON (`{"open": [...], "high": [...], ...}`).
pub fn load_fixture(path: &Path) -> Result<SampleFixture> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read fixture failed: {}", path.display()))?;
    let fx: SampleFixture = serde_json::from_str(&raw)
        .with_context(|| format!("parse fixture failed: {}", path.display()))?;
    if fx.is_empty() {
        bail!("FIXTURE_INVALID {}: no samples", path.display());
    }
    if !fx.is_well_formed() {
        bail!(
            "FIXTURE_INVALID {}: columns must be equal length and finite",
            path.display()
        );
    }
    Ok(fx)
}

/// Four uniform draws in [0, 1) for bar `i`.
fn draws(seed: u64, i: u64) -> [f64; 4] {
    let mut h = Sha256::new();
    h.update(seed.to_le_bytes());
    h.update(i.to_le_bytes());
    let digest = h.finalize();

    let mut out = [0.0; 4];
    for (slot, chunk) in out.iter_mut().zip(digest.chunks_exact(8)) {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        // Top 53 bits -> exact f64 in [0, 1).
        *slot = (u64::from_le_bytes(buf) >> 11) as f64 / (1u64 << 53) as f64;
    }
    out
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_bits() {
        let a = generate_fixture(64, 7);
        let b = generate_fixture(64, 7);
        let bits = |v: &[f64]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a.close), bits(&b.close));
        assert_eq!(bits(&a.volume), bits(&b.volume));
    }

    #[test]
    fn different_seed_different_series() {
        assert_ne!(generate_fixture(16, 1).close, generate_fixture(16, 2).close);
    }

    #[test]
    fn bars_are_consistent_ohlc() {
        let fx = generate_fixture(256, 42);
        assert_eq!(fx.len(), 256);
        assert!(fx.is_well_formed());
        for i in 0..fx.len() {
            assert!(fx.high[i] >= fx.open[i].max(fx.close[i]) - 1e-9, "bar {i}");
            assert!(fx.low[i] <= fx.open[i].min(fx.close[i]) + 1e-9, "bar {i}");
            assert!(fx.volume[i] >= 1_000.0 && fx.volume[i] <= 10_000.0);
        }
        // Each bar opens at the previous close.
        assert!(fx.open.iter().skip(1).zip(&fx.close).all(|(o, c)| o == c));
    }

    #[test]
    fn load_rejects_ragged_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fx.json");
        std::fs::write(
            &path,
            r#"{"open":[1,2],"high":[1,2],"low":[1,2],"close":[1],"volume":[1,2]}"#,
        )
        .unwrap();
        let err = load_fixture(&path).unwrap_err();
        assert!(format!("{err}").contains("FIXTURE_INVALID"), "got: {err}");
    }

    #[test]
    fn load_round_trips_generated_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fx.json");
        let fx = generate_fixture(10, 3);
        std::fs::write(&path, serde_json::to_vec(&fx).unwrap()).unwrap();
        assert_eq!(load_fixture(&path).unwrap(), fx);
    }
}

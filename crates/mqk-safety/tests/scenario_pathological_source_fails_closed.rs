//! Scenario: pathological but small sources are rejected, never crash the scan.
//!
//! GREEN when:
//! - a 100k-term `1+1+...` expression (well under the source size cap)
//!   comes back as a `FrontendError` instead of overflowing the stack.
//! - long attribute, call and subscript chains are rejected the same way.
//! - the error names the nesting limit so the verdict reason is actionable.

use mqk_safety::SafetyAnalyzer;

fn compute_returning(expr: &str) -> String {
    format!("def compute(bars, params):\n    return {expr}\n")
}

#[test]
fn long_binary_chain_is_a_frontend_error() {
    let src = compute_returning(&format!("1{}", "+1".repeat(100_000)));
    assert!(src.len() < 256 * 1024);

    let err = SafetyAnalyzer::default().scan(&src).unwrap_err();
    assert!(err.to_string().contains("nesting_too_deep"), "{err}");
}

#[test]
fn long_postfix_chains_are_frontend_errors() {
    let analyzer = SafetyAnalyzer::default();
    for expr in [
        format!("bars{}", ".close".repeat(20_000)),
        format!("len{}", "()".repeat(40_000)),
        format!("bars.close{}", "[0]".repeat(20_000)),
    ] {
        assert!(analyzer.scan(&compute_returning(&expr)).is_err());
    }
}

#[test]
fn ordinary_formulas_still_scan() {
    let src = compute_returning("bars.close[0] * 2 + bars.open[0] / 3 - bars.high[1] ** 2");
    assert!(SafetyAnalyzer::default().scan(&src).unwrap().is_safe());
}

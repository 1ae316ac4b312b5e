//! Scenario: the manifest schema is closed-world.
//!
//! GREEN when:
//! - a key the schema does not know (at top level or inside a param) is
//!   rejected with SCHEMA_INVALID and its field path, even when every other
//!   field is valid.
//! - all problems are reported together, in document order.

use mqk_manifest::validate_manifest;
use mqk_schemas::PluginKind;

const SMUGGLED: &str = r#"
id: rsi
kind: indicator
version: "2.1"
inputs: [close, close]
outputs: [rsi]
warmup_bars: 14
nan_policy: fill
post_validate_hook: "import os"
params:
  - name: period
    type: int
    default: 14
    exec: "rm -rf /"
"#;

#[test]
fn every_problem_is_reported_with_its_path() {
    let err = validate_manifest(SMUGGLED, PluginKind::Indicator, "rsi").unwrap_err();
    assert_eq!(
        err.reasons(),
        vec![
            "SCHEMA_INVALID inputs[1]: duplicate entry 'close'",
            "SCHEMA_INVALID post_validate_hook: unknown field for indicator manifest",
            "SCHEMA_INVALID params[0].exec: unknown field",
        ]
    );
    assert_eq!(err.first_path(), "inputs[1]");
}

#[test]
fn removing_the_smuggled_keys_makes_it_valid() {
    let clean = SMUGGLED
        .replace("[close, close]", "[close]")
        .replace("post_validate_hook: \"import os\"\n", "")
        .replace("    exec: \"rm -rf /\"\n", "");
    let m = validate_manifest(&clean, PluginKind::Indicator, "rsi").unwrap();
    assert_eq!(m.id, "rsi");
    assert_eq!(m.default_params().len(), 1);
}

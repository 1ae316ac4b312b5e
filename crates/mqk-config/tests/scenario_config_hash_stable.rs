//! Scenario: config hash stability.
//!
//! GREEN when:
//! - loading the same layers twice gives the same hash.
//! - key order inside a YAML document does not change the hash.
//! - a changed value changes the hash.
//! - layer order matters (later wins), so swapping conflicting layers changes the hash.

use mqk_config::load_layered_yaml_from_strings;

const BASE_YAML: &str = r#"
paths:
  submissions_root: "plugins/submissions"
  registry_root: "plugins/registry"
sandbox:
  timeout_secs: 5
  memory_limit_mb: 512
fixture:
  bars: 256
"#;

const BASE_YAML_REORDERED: &str = r#"
fixture:
  bars: 256
sandbox:
  memory_limit_mb: 512
  timeout_secs: 5
paths:
  registry_root: "plugins/registry"
  submissions_root: "plugins/submissions"
"#;

const OVERLAY_YAML: &str = r#"
sandbox:
  timeout_secs: 2
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
    assert_eq!(a.config_hash.len(), 64, "sha256 hex digest");
}

#[test]
fn key_order_does_not_change_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn different_values_produce_different_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_ne!(a.config_hash, b.config_hash);
    assert_eq!(b.engine_config().unwrap().sandbox.timeout_secs, 2.0);
}

#[test]
fn layer_order_is_significant() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[OVERLAY_YAML, BASE_YAML]).unwrap();
    assert_ne!(a.config_hash, b.config_hash);
    assert_eq!(b.engine_config().unwrap().sandbox.timeout_secs, 5.0);
}

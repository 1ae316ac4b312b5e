//! mqk-manifest
//!
//! Closed-world validation of plugin manifests.
//!
//! The manifest is walked as a YAML tree (document order preserved) rather
//! than deserialized straight into [`Manifest`]: every problem is collected
//! with its field path, and only a manifest with zero issues is normalized.

use std::collections::BTreeSet;

use mqk_schemas::{
    Intent, InputField, KindContract, Manifest, NanPolicy, ParamSpec, PluginKind,
};
use serde_yaml::{Mapping, Value};

mod params;

/// Fields allowed on every manifest.
const COMMON_FIELDS: &[&str] = &[
    "id",
    "kind",
    "name",
    "version",
    "description",
    "params",
    "warmup_bars",
    "nan_policy",
];
const INDICATOR_FIELDS: &[&str] = &["inputs", "outputs"];
const STRATEGY_FIELDS: &[&str] = &["requires", "intents"];

const MAX_ID_LEN: usize = 64;

/// One schema problem at a field path such as `params[1].default`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestIssue {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ManifestIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SCHEMA_INVALID {}: {}", self.path, self.message)
    }
}

/// All issues found in a manifest, in document order. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestError {
    pub issues: Vec<ManifestIssue>,
}

impl ManifestError {
    pub fn reasons(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }

    /// Path of the first offending field.
    pub fn first_path(&self) -> &str {
        self.issues.first().map(|i| i.path.as_str()).unwrap_or("$")
    }
}

impl std::fmt::Display for ManifestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.issues.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ManifestError {}

/// Validate raw manifest YAML for a submission of `kind` with id `id`.
pub fn validate_manifest(raw_yaml: &str, kind: PluginKind, id: &str) -> Result<Manifest, ManifestError> {
    let doc: Value = serde_yaml::from_str(raw_yaml).map_err(|e| ManifestError {
        issues: vec![ManifestIssue {
            path: "$".to_string(),
            message: format!("manifest is not valid YAML: {e}"),
        }],
    })?;
    validate_manifest_value(&doc, kind, id)
}

/// Same as [`validate_manifest`] for an already-parsed document.
pub fn validate_manifest_value(doc: &Value, kind: PluginKind, id: &str) -> Result<Manifest, ManifestError> {
    let mut cx = Checker::default();
    let manifest = cx.manifest(doc, kind, id);
    match manifest {
        Some(m) if cx.issues.is_empty() => Ok(m),
        _ => {
            if cx.issues.is_empty() {
                cx.issue("$", "manifest could not be normalized");
            }
            Err(ManifestError { issues: cx.issues })
        }
    }
}

#[derive(Default)]
pub(crate) struct Checker {
    issues: Vec<ManifestIssue>,
}

#[derive(Default)]
struct Fields {
    id: Option<String>,
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    params: Vec<ParamSpec>,
    warmup_bars: Option<u32>,
    nan_policy: Option<NanPolicy>,
    inputs: Option<Vec<InputField>>,
    outputs: Option<Vec<String>>,
    requires: Option<Vec<String>>,
    intents: Option<Vec<Intent>>,
}

pub(crate) fn describe(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Plugin ids: `[A-Za-z0-9_-]+`, bounded length. They become path segments.
pub fn is_valid_plugin_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_ID_LEN
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl Checker {
    pub(crate) fn issue(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ManifestIssue {
            path: path.into(),
            message: message.into(),
        });
    }

    pub(crate) fn string(&mut self, path: &str, v: &Value) -> Option<String> {
        match v {
            Value::String(s) => Some(s.clone()),
            other => {
                self.issue(path, format!("expected string, found {}", describe(other)));
                None
            }
        }
    }

    fn non_empty_string(&mut self, path: &str, v: &Value) -> Option<String> {
        let s = self.string(path, v)?;
        if s.trim().is_empty() {
            self.issue(path, "must not be empty");
            return None;
        }
        Some(s)
    }

    pub(crate) fn sequence<'a>(&mut self, path: &str, v: &'a Value) -> Option<&'a [Value]> {
        match v {
            Value::Sequence(items) => Some(items),
            other => {
                self.issue(path, format!("expected list, found {}", describe(other)));
                None
            }
        }
    }

    /// List of strings, each mapped through `parse`; duplicates are reported.
    fn unique_list<T: Ord + Clone>(
        &mut self,
        path: &str,
        v: &Value,
        non_empty: bool,
        mut parse: impl FnMut(&mut Checker, &str, &str) -> Option<T>,
    ) -> Option<Vec<T>> {
        let items = self.sequence(path, v)?;
        if non_empty && items.is_empty() {
            self.issue(path, "must not be empty");
            return None;
        }
        let before = self.issues.len();
        let mut seen = BTreeSet::new();
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let ipath = format!("{path}[{i}]");
            let Some(s) = self.string(&ipath, item) else {
                continue;
            };
            let Some(parsed) = parse(self, &ipath, &s) else {
                continue;
            };
            if !seen.insert(parsed.clone()) {
                self.issue(&ipath, format!("duplicate entry '{s}'"));
                continue;
            }
            out.push(parsed);
        }
        (self.issues.len() == before).then_some(out)
    }

    fn manifest(&mut self, doc: &Value, expected_kind: PluginKind, expected_id: &str) -> Option<Manifest> {
        let Value::Mapping(map) = doc else {
            self.issue("$", format!("manifest must be a mapping, found {}", describe(doc)));
            return None;
        };

        let kind = self.declared_kind(map, expected_kind);
        let kind_fields = match kind {
            PluginKind::Indicator => INDICATOR_FIELDS,
            PluginKind::Strategy => STRATEGY_FIELDS,
        };

        let mut f = Fields::default();
        let mut present = BTreeSet::new();
        for (k, v) in map {
            let Value::String(key) = k else {
                self.issue("$", format!("field names must be strings, found {}", describe(k)));
                continue;
            };
            present.insert(key.as_str());
            if !COMMON_FIELDS.contains(&key.as_str()) && !kind_fields.contains(&key.as_str()) {
                self.issue(key.as_str(), format!("unknown field for {kind} manifest"));
                continue;
            }
            self.field(&mut f, key, v, expected_id);
        }

        let required: &[&str] = match kind {
            PluginKind::Indicator => &["id", "kind", "version", "warmup_bars", "nan_policy", "inputs", "outputs"],
            PluginKind::Strategy => &["id", "kind", "version", "warmup_bars", "nan_policy", "intents"],
        };
        for r in required {
            if !present.contains(r) {
                self.issue(*r, "missing required field");
            }
        }

        let contract = match kind {
            PluginKind::Indicator => KindContract::Indicator {
                inputs: f.inputs?,
                outputs: f.outputs?,
            },
            PluginKind::Strategy => KindContract::Strategy {
                requires: f.requires.unwrap_or_default(),
                intents: f.intents?.into_iter().collect(),
            },
        };
        Some(Manifest {
            id: f.id?,
            name: f.name,
            version: f.version?,
            description: f.description,
            params: f.params,
            warmup_bars: f.warmup_bars?,
            nan_policy: f.nan_policy?,
            contract,
        })
    }

    /// Kind used for the field allow-list. Falls back to the submission's kind
    /// when the declared one is missing or bad (the problem is still reported).
    fn declared_kind(&mut self, map: &Mapping, expected: PluginKind) -> PluginKind {
        let Some(v) = map.get("kind") else {
            return expected;
        };
        let declared = match v {
            Value::String(s) => match s.as_str() {
                "indicator" => Some(PluginKind::Indicator),
                "strategy" => Some(PluginKind::Strategy),
                _ => None,
            },
            _ => None,
        };
        match declared {
            None => {
                self.issue("kind", "must be one of: indicator, strategy");
                expected
            }
            Some(k) if k != expected => {
                self.issue(
                    "kind",
                    format!("declared kind '{k}' does not match submission kind '{expected}'"),
                );
                expected
            }
            Some(k) => k,
        }
    }

    fn field(&mut self, f: &mut Fields, key: &str, v: &Value, expected_id: &str) {
        match key {
            // Already checked by declared_kind().
            "kind" => {}
            "id" => {
                if let Some(id) = self.string(key, v) {
                    if !is_valid_plugin_id(&id) {
                        self.issue(key, format!("'{id}' is not a valid plugin id ([A-Za-z0-9_-]+, at most {MAX_ID_LEN} chars)"));
                    } else if id != expected_id {
                        self.issue(key, format!("'{id}' does not match submission id '{expected_id}'"));
                    } else {
                        f.id = Some(id);
                    }
                }
            }
            "name" => f.name = self.string(key, v),
            "description" => f.description = self.string(key, v),
            "version" => f.version = self.non_empty_string(key, v),
            "warmup_bars" => {
                f.warmup_bars = match v {
                    Value::Number(n) => match n.as_u64().and_then(|n| u32::try_from(n).ok()) {
                        Some(w) => Some(w),
                        None => {
                            self.issue(key, format!("must be a non-negative integer, found {n}"));
                            None
                        }
                    },
                    other => {
                        self.issue(key, format!("expected integer, found {}", describe(other)));
                        None
                    }
                }
            }
            "nan_policy" => {
                if let Some(s) = self.string(key, v) {
                    f.nan_policy = NanPolicy::parse(&s);
                    if f.nan_policy.is_none() {
                        self.issue(key, format!("'{s}' is not one of: propagate, fill, error"));
                    }
                }
            }
            "params" => {
                if let Some(items) = self.sequence(key, v) {
                    f.params = self.params(items);
                }
            }
            "inputs" => {
                f.inputs = self.unique_list(key, v, true, |cx, path, s| {
                    let field = InputField::parse(s);
                    if field.is_none() {
                        cx.issue(path, format!("'{s}' is not one of: open, high, low, close, volume"));
                    }
                    field
                });
            }
            "outputs" => {
                f.outputs = self.unique_list(key, v, true, |cx, path, s| {
                    if is_identifier(s) {
                        Some(s.to_string())
                    } else {
                        cx.issue(path, format!("'{s}' is not a valid output name"));
                        None
                    }
                });
            }
            "requires" => {
                f.requires = self.unique_list(key, v, false, |cx, path, s| {
                    if is_valid_plugin_id(s) {
                        Some(s.to_string())
                    } else {
                        cx.issue(path, format!("'{s}' is not a valid plugin id"));
                        None
                    }
                });
            }
            "intents" => {
                let intents = self.unique_list(key, v, true, |cx, path, s| {
                    let intent = Intent::parse(s);
                    if intent.is_none() {
                        cx.issue(
                            path,
                            format!("'{s}' is not one of: HOLD, ENTER_LONG, ENTER_SHORT, EXIT_LONG, EXIT_SHORT"),
                        );
                    }
                    intent
                });
                if let Some(list) = &intents {
                    if !list.contains(&Intent::Hold) {
                        self.issue(key, "must include HOLD");
                        return;
                    }
                }
                f.intents = intents;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDICATOR: &str = r#"
id: sma_fast
kind: indicator
name: Fast SMA
version: "1.0.0"
inputs: [close]
outputs: [sma]
warmup_bars: 9
nan_policy: propagate
params:
  - name: period
    type: int
    default: 10
    min: 2
    max: 200
"#;

    const STRATEGY: &str = r#"
id: cross
kind: strategy
version: "0.1"
requires: [sma_fast]
intents: [HOLD, ENTER_LONG, EXIT_LONG]
warmup_bars: 20
nan_policy: error
"#;

    fn issues(yaml: &str, kind: PluginKind, id: &str) -> Vec<String> {
        validate_manifest(yaml, kind, id).unwrap_err().reasons()
    }

    #[test]
    fn valid_indicator_normalizes() {
        let m = validate_manifest(INDICATOR, PluginKind::Indicator, "sma_fast").unwrap();
        assert_eq!(m.kind(), PluginKind::Indicator);
        assert_eq!(m.warmup_bars, 9);
        assert_eq!(m.nan_policy, NanPolicy::Propagate);
        assert_eq!(m.params.len(), 1);
        assert_eq!(
            m.contract,
            KindContract::Indicator {
                inputs: vec![InputField::Close],
                outputs: vec!["sma".to_string()],
            }
        );
    }

    #[test]
    fn valid_strategy_normalizes() {
        let m = validate_manifest(STRATEGY, PluginKind::Strategy, "cross").unwrap();
        assert_eq!(m.required_indicators(), ["sma_fast".to_string()]);
        let KindContract::Strategy { intents, .. } = &m.contract else {
            panic!("expected strategy contract");
        };
        assert!(intents.contains(&Intent::EnterLong));
        assert!(!intents.contains(&Intent::EnterShort));
    }

    #[test]
    fn unknown_and_cross_kind_fields_are_rejected() {
        let yaml = format!("{INDICATOR}intents: [HOLD]\nhooks: x\n");
        let r = issues(&yaml, PluginKind::Indicator, "sma_fast");
        assert_eq!(
            r,
            vec![
                "SCHEMA_INVALID intents: unknown field for indicator manifest".to_string(),
                "SCHEMA_INVALID hooks: unknown field for indicator manifest".to_string(),
            ]
        );
    }

    #[test]
    fn missing_required_fields_are_listed() {
        let r = issues("id: x\nkind: strategy\n", PluginKind::Strategy, "x");
        assert_eq!(
            r,
            vec![
                "SCHEMA_INVALID version: missing required field",
                "SCHEMA_INVALID warmup_bars: missing required field",
                "SCHEMA_INVALID nan_policy: missing required field",
                "SCHEMA_INVALID intents: missing required field",
            ]
        );
    }

    #[test]
    fn closed_sets_are_enforced() {
        let yaml = STRATEGY
            .replace("nan_policy: error", "nan_policy: ignore")
            .replace("EXIT_LONG]", "BUY_MORE]");
        let r = issues(&yaml, PluginKind::Strategy, "cross");
        assert_eq!(r.len(), 2);
        assert!(r[0].starts_with("SCHEMA_INVALID intents[2]: 'BUY_MORE'"));
        assert!(r[1].starts_with("SCHEMA_INVALID nan_policy: 'ignore'"));
    }

    #[test]
    fn intents_must_include_hold() {
        let yaml = STRATEGY.replace("[HOLD, ENTER_LONG, EXIT_LONG]", "[ENTER_LONG, EXIT_LONG]");
        let r = issues(&yaml, PluginKind::Strategy, "cross");
        assert_eq!(r, vec!["SCHEMA_INVALID intents: must include HOLD"]);
    }

    #[test]
    fn id_and_kind_must_match_submission() {
        let r = issues(INDICATOR, PluginKind::Strategy, "other");
        assert!(r[0].starts_with("SCHEMA_INVALID kind: declared kind 'indicator'"));
        assert!(r.iter().any(|s| s.starts_with("SCHEMA_INVALID id: 'sma_fast' does not match")));
    }

    #[test]
    fn negative_warmup_is_rejected() {
        let yaml = INDICATOR.replace("warmup_bars: 9", "warmup_bars: -1");
        let r = issues(&yaml, PluginKind::Indicator, "sma_fast");
        assert_eq!(r, vec!["SCHEMA_INVALID warmup_bars: must be a non-negative integer, found -1"]);
    }

    #[test]
    fn non_mapping_document() {
        let r = issues("- a\n- b\n", PluginKind::Indicator, "x");
        assert_eq!(r, vec!["SCHEMA_INVALID $: manifest must be a mapping, found list"]);
    }

    #[test]
    fn duplicate_outputs_are_rejected() {
        let yaml = INDICATOR.replace("outputs: [sma]", "outputs: [sma, sma]");
        let r = issues(&yaml, PluginKind::Indicator, "sma_fast");
        assert_eq!(r, vec!["SCHEMA_INVALID outputs[1]: duplicate entry 'sma'"]);
    }
}

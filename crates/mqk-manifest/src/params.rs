use std::collections::BTreeSet;

use mqk_schemas::{ParamSpec, ParamType, ParamValue};
use serde_yaml::Value;

use crate::{describe, is_identifier, Checker};

const PARAM_FIELDS: &[&str] = &["name", "type", "default", "min", "max", "values"];

impl Checker {
    pub(crate) fn params(&mut self, items: &[Value]) -> Vec<ParamSpec> {
        let mut names = BTreeSet::new();
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let path = format!("params[{i}]");
            if let Some(spec) = self.param(&path, item) {
                if !names.insert(spec.name.clone()) {
                    self.issue(format!("{path}.name"), format!("duplicate parameter '{}'", spec.name));
                    continue;
                }
                out.push(spec);
            }
        }
        out
    }

    fn param(&mut self, path: &str, v: &Value) -> Option<ParamSpec> {
        let Value::Mapping(map) = v else {
            self.issue(path, format!("expected mapping, found {}", describe(v)));
            return None;
        };
        let before = self.issues.len();

        for (k, _) in map {
            match k {
                Value::String(key) if PARAM_FIELDS.contains(&key.as_str()) => {}
                Value::String(key) => self.issue(format!("{path}.{key}"), "unknown field"),
                other => self.issue(path, format!("field names must be strings, found {}", describe(other))),
            }
        }

        let name = match map.get("name") {
            Some(n) => self.string(&format!("{path}.name"), n).and_then(|n| {
                if is_identifier(&n) {
                    Some(n)
                } else {
                    self.issue(format!("{path}.name"), format!("'{n}' is not a valid identifier"));
                    None
                }
            }),
            None => {
                self.issue(format!("{path}.name"), "missing required field");
                None
            }
        };

        let ty = match map.get("type") {
            Some(t) => self.string(&format!("{path}.type"), t).and_then(|t| {
                let ty = ParamType::parse(&t);
                if ty.is_none() {
                    self.issue(
                        format!("{path}.type"),
                        format!("'{t}' is not one of: int, float, bool, string, enum"),
                    );
                }
                ty
            }),
            None => {
                self.issue(format!("{path}.type"), "missing required field");
                None
            }
        };

        let values = match (ty, map.get("values")) {
            (Some(ParamType::Enum), Some(v)) => self.enum_values(&format!("{path}.values"), v),
            (Some(ParamType::Enum), None) => {
                self.issue(format!("{path}.values"), "missing required field for enum param");
                None
            }
            (Some(other), Some(_)) => {
                self.issue(
                    format!("{path}.values"),
                    format!("only allowed for enum params, not {}", other.as_str()),
                );
                None
            }
            (_, None) => Some(Vec::new()),
            (None, Some(_)) => None,
        };

        let default = match (ty, map.get("default")) {
            (Some(ty), Some(d)) => self.typed_value(&format!("{path}.default"), ty, d),
            (None, Some(_)) => None,
            (_, None) => {
                self.issue(format!("{path}.default"), "missing required field");
                None
            }
        };

        let bound = |cx: &mut Checker, field: &str| -> Option<Option<ParamValue>> {
            let v = map.get(field)?;
            let bpath = format!("{path}.{field}");
            match ty {
                Some(t) if t.is_numeric() => Some(cx.typed_value(&bpath, t, v)),
                Some(t) => {
                    cx.issue(bpath, format!("only allowed for int/float params, not {}", t.as_str()));
                    Some(None)
                }
                None => Some(None),
            }
        };
        let min = bound(self, "min");
        let max = bound(self, "max");

        if self.issues.len() != before {
            return None;
        }
        let (name, ty, default, values) = (name?, ty?, default?, values?);
        let min = min.flatten();
        let max = max.flatten();

        if let (ParamType::Enum, ParamValue::Str(d)) = (ty, &default) {
            if !values.contains(d) {
                self.issue(format!("{path}.default"), format!("'{d}' is not one of the declared values"));
            }
        }

        let (lo, hi, dv) = (
            min.as_ref().and_then(ParamValue::as_f64),
            max.as_ref().and_then(ParamValue::as_f64),
            default.as_f64(),
        );
        if let (Some(lo), Some(hi)) = (lo, hi) {
            if lo > hi {
                self.issue(format!("{path}.min"), format!("min {lo} is greater than max {hi}"));
            }
        }
        if let (Some(lo), Some(d)) = (lo, dv) {
            if d < lo {
                self.issue(format!("{path}.default"), format!("default {d} is below min {lo}"));
            }
        }
        if let (Some(hi), Some(d)) = (hi, dv) {
            if d > hi {
                self.issue(format!("{path}.default"), format!("default {d} is above max {hi}"));
            }
        }

        if self.issues.len() != before {
            return None;
        }
        Some(ParamSpec {
            name,
            ty,
            default,
            min,
            max,
            values,
        })
    }

    fn typed_value(&mut self, path: &str, ty: ParamType, v: &Value) -> Option<ParamValue> {
        let value = match (ty, v) {
            (ParamType::Int, Value::Number(n)) if n.as_i64().is_some() => n.as_i64().map(ParamValue::Int),
            (ParamType::Float, Value::Number(n)) => match n.as_f64() {
                Some(x) if x.is_finite() => Some(ParamValue::Float(x)),
                _ => {
                    self.issue(path, "must be a finite number");
                    return None;
                }
            },
            (ParamType::Bool, Value::Bool(b)) => Some(ParamValue::Bool(*b)),
            (ParamType::String | ParamType::Enum, Value::String(s)) => Some(ParamValue::Str(s.clone())),
            _ => None,
        };
        if value.is_none() {
            self.issue(
                path,
                format!("expected {} value, found {}", ty.as_str(), describe(v)),
            );
        }
        value
    }

    fn enum_values(&mut self, path: &str, v: &Value) -> Option<Vec<String>> {
        let items = self.sequence(path, v)?;
        if items.is_empty() {
            self.issue(path, "must not be empty");
            return None;
        }
        let before = self.issues.len();
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let ipath = format!("{path}[{i}]");
            if let Some(s) = self.string(&ipath, item) {
                if !seen.insert(s.clone()) {
                    self.issue(ipath, format!("duplicate entry '{s}'"));
                } else {
                    out.push(s);
                }
            }
        }
        (self.issues.len() == before).then_some(out)
    }
}

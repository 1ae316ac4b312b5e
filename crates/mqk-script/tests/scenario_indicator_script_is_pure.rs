//! Scenario: a realistic indicator script evaluates to the same series on
//! every run, with NaN placeholders in its warmup region.
//!
//! GREEN when:
//! - a simple moving average over `bars.close` matches a hand computation.
//! - evaluating the same source twice yields bit-identical output.
//! - `None` entries survive as placeholders in the returned list.

use std::collections::BTreeMap;

use mqk_script::{run_entrypoint, Value};

const SMA_SOURCE: &str = r#"
import math

def compute(bars, params):
    n = params["period"]
    closes = bars.close
    out = []
    acc = 0.0
    for i in range(len(closes)):
        acc += closes[i]
        if i >= n:
            acc -= closes[i - n]
        if i < n - 1:
            out.append(None)
        else:
            out.append(acc / n)
    return out
"#;

fn bars(close: &[f64]) -> Value {
    let mut fields = BTreeMap::new();
    for name in ["open", "high", "low", "close", "volume"] {
        fields.insert(name.to_string(), Value::float_list(close));
    }
    Value::record(fields)
}

fn params(period: i64) -> Value {
    let mut p = BTreeMap::new();
    p.insert("period".to_string(), Value::Int(period));
    Value::dict(p)
}

fn series(v: &Value) -> Vec<Option<f64>> {
    let Value::List(items) = v else {
        panic!("expected list, got {v:?}");
    };
    items
        .borrow()
        .iter()
        .map(|x| match x {
            Value::None => None,
            other => Some(other.as_f64().expect("numeric entry")),
        })
        .collect()
}

#[test]
fn moving_average_matches_hand_computation() {
    let closes = [1.0, 2.0, 3.0, 4.0, 5.0];
    let out = run_entrypoint(SMA_SOURCE, "compute", vec![bars(&closes), params(3)]).unwrap();
    assert_eq!(
        series(&out),
        vec![None, None, Some(2.0), Some(3.0), Some(4.0)]
    );
}

#[test]
fn repeated_evaluation_is_bit_identical() {
    let closes: Vec<f64> = (0..200).map(|i| 100.0 + (i as f64 * 0.37).sin()).collect();
    let a = run_entrypoint(SMA_SOURCE, "compute", vec![bars(&closes), params(14)]).unwrap();
    let b = run_entrypoint(SMA_SOURCE, "compute", vec![bars(&closes), params(14)]).unwrap();
    let bits = |v: &Value| -> Vec<Option<u64>> {
        series(v).into_iter().map(|x| x.map(f64::to_bits)).collect()
    };
    assert_eq!(bits(&a), bits(&b));
    assert_eq!(series(&a).iter().filter(|x| x.is_none()).count(), 13);
}

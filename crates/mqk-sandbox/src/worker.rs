//! Worker side of the sandbox: runs inside the resource-limited child.
//!
//! Reads one [`WorkerRequest`] from stdin, evaluates the plugin once and
//! writes exactly one response frame to stdout. Nothing else may ever be
//! written to stdout; diagnostics go to stderr, which the host keeps a
//! tail of for failure details.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use mqk_schemas::{InputField, ParamValue, PluginKind, SampleFixture};
use mqk_script::{run_entrypoint, Value};

use crate::protocol::{
    encode_frame, RawOutput, WorkerRequest, WorkerResponse, WorkerResult, ENTRYPOINT,
};

pub const EXIT_OK: i32 = 0;
/// Request could not be read; no frame was written.
pub const EXIT_BAD_REQUEST: i32 = 2;
/// Plugin raised or returned the wrong type; an error frame was written.
pub const EXIT_PLUGIN_FAILED: i32 = 3;

/// Requests are host-generated; anything bigger than this is not ours.
const MAX_REQUEST_BYTES: u64 = 64 * 1024 * 1024;

/// Process entry for worker mode. Returns the exit code.
pub fn worker_main() -> i32 {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    run_worker(stdin.lock(), stdout.lock())
}

pub fn run_worker<R: Read, W: Write>(input: R, mut output: W) -> i32 {
    let mut raw = Vec::new();
    if let Err(e) = input.take(MAX_REQUEST_BYTES).read_to_end(&mut raw) {
        eprintln!("mqk-sandbox-worker: read request failed: {e}");
        return EXIT_BAD_REQUEST;
    }
    let req: WorkerRequest = match serde_json::from_slice(&raw) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("mqk-sandbox-worker: bad request: {e}");
            return EXIT_BAD_REQUEST;
        }
    };

    let result = evaluate(&req);
    let code = match result {
        WorkerResult::Ok { .. } => EXIT_OK,
        _ => EXIT_PLUGIN_FAILED,
    };

    let (cpu_time_ms, peak_rss_kb) = self_usage();
    let resp = WorkerResponse {
        cpu_time_ms,
        peak_rss_kb,
        result,
    };
    let frame = match encode_frame(&resp) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("mqk-sandbox-worker: encode response failed: {e}");
            return EXIT_BAD_REQUEST;
        }
    };
    if let Err(e) = output.write_all(&frame).and_then(|_| output.flush()) {
        eprintln!("mqk-sandbox-worker: write response failed: {e}");
        return EXIT_BAD_REQUEST;
    }
    code
}

/// Evaluate the plugin once and convert its return value.
pub fn evaluate(req: &WorkerRequest) -> WorkerResult {
    let args = vec![
        bars_value(&req.fixture, &req.inputs),
        params_value(&req.params),
    ];
    match run_entrypoint(&req.source, ENTRYPOINT, args) {
        Ok(value) => match convert_output(req.kind, &value) {
            Ok(output) => WorkerResult::Ok { output },
            Err(message) => WorkerResult::ShapeError { message },
        },
        Err(e) => WorkerResult::PluginError {
            message: e.to_string(),
        },
    }
}

fn bars_value(fx: &SampleFixture, inputs: &[InputField]) -> Value {
    let exposed: &[InputField] = if inputs.is_empty() {
        &InputField::ALL
    } else {
        inputs
    };
    let fields = exposed
        .iter()
        .map(|f| {
            let col = match f {
                InputField::Open => &fx.open,
                InputField::High => &fx.high,
                InputField::Low => &fx.low,
                InputField::Close => &fx.close,
                InputField::Volume => &fx.volume,
            };
            (f.as_str().to_string(), Value::float_list(col))
        })
        .collect();
    Value::record(fields)
}

fn params_value(params: &BTreeMap<String, ParamValue>) -> Value {
    let items = params
        .iter()
        .map(|(k, v)| {
            let v = match v {
                ParamValue::Bool(b) => Value::Bool(*b),
                ParamValue::Int(i) => Value::Int(*i),
                ParamValue::Float(f) => Value::Float(*f),
                ParamValue::Str(s) => Value::str(s),
            };
            (k.clone(), v)
        })
        .collect();
    Value::dict(items)
}

pub fn convert_output(kind: PluginKind, value: &Value) -> Result<RawOutput, String> {
    match kind {
        PluginKind::Indicator => match value {
            Value::List(items) => Ok(RawOutput::Series {
                bits: series_bits(&items.borrow(), "output")?,
            }),
            Value::Dict(map) => {
                let mut columns = BTreeMap::new();
                for (name, col) in map.borrow().iter() {
                    let Value::List(items) = col else {
                        return Err(format!(
                            "output '{name}' is {}, expected list",
                            col.type_name()
                        ));
                    };
                    columns.insert(name.clone(), series_bits(&items.borrow(), name)?);
                }
                Ok(RawOutput::Columns { columns })
            }
            other => Err(format!(
                "indicator returned {}, expected list or dict of lists",
                other.type_name()
            )),
        },
        PluginKind::Strategy => {
            let Value::List(items) = value else {
                return Err(format!(
                    "strategy returned {}, expected list of intents",
                    value.type_name()
                ));
            };
            let values = items
                .borrow()
                .iter()
                .enumerate()
                .map(|(i, v)| match v {
                    Value::Str(s) => Ok(s.to_string()),
                    other => Err(format!("intent[{i}] is {}, expected str", other.type_name())),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RawOutput::Intents { values })
        }
    }
}

/// None becomes NaN; bools are rejected so a predicate is never mistaken
/// for a numeric series.
fn series_bits(items: &[Value], name: &str) -> Result<Vec<u64>, String> {
    items
        .iter()
        .enumerate()
        .map(|(i, v)| match v {
            Value::None => Ok(f64::NAN.to_bits()),
            Value::Int(n) => Ok((*n as f64).to_bits()),
            Value::Float(f) => Ok(f.to_bits()),
            other => Err(format!("{name}[{i}] is {}, expected number", other.type_name())),
        })
        .collect()
}

/// (cpu ms, peak RSS KiB) of this process.
#[cfg(unix)]
fn self_usage() -> (u64, u64) {
    // SAFETY: getrusage only writes into the zeroed struct we pass.
    let ru = unsafe {
        let mut ru: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut ru) != 0 {
            return (0, 0);
        }
        ru
    };
    let ms = |tv: libc::timeval| (tv.tv_sec as u64) * 1_000 + (tv.tv_usec as u64) / 1_000;
    // ru_maxrss is KiB on Linux.
    (ms(ru.ru_utime) + ms(ru.ru_stime), ru.ru_maxrss as u64)
}

#[cfg(not(unix))]
fn self_usage() -> (u64, u64) {
    (0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_frame;

    fn request(kind: PluginKind, source: &str) -> WorkerRequest {
        WorkerRequest {
            kind,
            source: source.to_string(),
            params: BTreeMap::from([("period".to_string(), ParamValue::Int(2))]),
            inputs: vec![InputField::Close],
            fixture: crate::generate_fixture(5, 1),
        }
    }

    #[test]
    fn indicator_list_becomes_series_with_nan_for_none() {
        let src = "\
def compute(bars, params):
    out = []
    for i in range(len(bars.close)):
        if i < params['period'] - 1:
            out.append(None)
        else:
            out.append(bars.close[i])
    return out
";
        let WorkerResult::Ok {
            output: RawOutput::Series { bits },
        } = evaluate(&request(PluginKind::Indicator, src))
        else {
            panic!("expected series");
        };
        assert_eq!(bits.len(), 5);
        assert!(f64::from_bits(bits[0]).is_nan());
        assert!(!f64::from_bits(bits[1]).is_nan());
    }

    #[test]
    fn undeclared_inputs_are_not_exposed() {
        let src = "def compute(bars, params):\n    return bars.open\n";
        let res = evaluate(&request(PluginKind::Indicator, src));
        assert!(matches!(res, WorkerResult::PluginError { .. }), "got {res:?}");
    }

    #[test]
    fn strategy_must_return_strings() {
        let src = "def compute(bars, params):\n    return [1, 2]\n";
        let res = evaluate(&request(PluginKind::Strategy, src));
        let WorkerResult::ShapeError { message } = res else {
            panic!("expected shape error, got {res:?}");
        };
        assert!(message.contains("intent[0] is int"), "got: {message}");
    }

    #[test]
    fn plugin_error_writes_frame_and_exit_code() {
        let req = request(PluginKind::Indicator, "def compute(bars, params):\n    return 1 / 0\n");
        let mut out = Vec::new();
        let code = run_worker(serde_json::to_vec(&req).unwrap().as_slice(), &mut out);
        assert_eq!(code, EXIT_PLUGIN_FAILED);
        let resp = decode_frame(&out).unwrap();
        assert!(matches!(resp.result, WorkerResult::PluginError { .. }));
    }

    #[test]
    fn garbage_request_writes_nothing() {
        let mut out = Vec::new();
        assert_eq!(run_worker(&b"not json"[..], &mut out), EXIT_BAD_REQUEST);
        assert!(out.is_empty());
    }
}

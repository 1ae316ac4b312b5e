//! Host <-> worker wire format.
//!
//! The host writes one JSON [`WorkerRequest`] to the worker's stdin and
//! closes it. The worker answers with exactly one frame on stdout:
//!
//! ```text
//! MQKW1 <len>\n<len bytes of JSON WorkerResponse>
//! ```
//!
//! The length prefix is what lets the host tell a complete answer from a
//! worker that died mid-write. Series values travel as `f64::to_bits` so NaN
//! survives JSON and the determinism check compares the exact bits produced.

use std::collections::BTreeMap;

use mqk_schemas::{InputField, ParamValue, PluginKind, SampleFixture};
use serde::{Deserialize, Serialize};

pub const FRAME_MAGIC: &str = "MQKW1";

/// Longest accepted header line (`MQKW1 ` + a u64 + `\n`).
const MAX_HEADER_LEN: usize = 32;

/// Plugin entry point invoked by the worker.
pub const ENTRYPOINT: &str = "compute";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub kind: PluginKind,
    pub source: String,
    pub params: BTreeMap<String, ParamValue>,
    /// Bar fields exposed to the plugin. Empty exposes all of them.
    pub inputs: Vec<InputField>,
    pub fixture: SampleFixture,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub cpu_time_ms: u64,
    pub peak_rss_kb: u64,
    pub result: WorkerResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerResult {
    Ok { output: RawOutput },
    /// Parse error, runtime error or missing entry point.
    PluginError { message: String },
    /// The plugin returned a value of the wrong type.
    ShapeError { message: String },
}

/// Plugin return value before the host checks it against the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawOutput {
    /// Indicator returned a bare list.
    Series { bits: Vec<u64> },
    /// Indicator returned a dict of lists.
    Columns { columns: BTreeMap<String, Vec<u64>> },
    /// Strategy returned a list of intent names.
    Intents { values: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Channel closed before any byte was written.
    Empty,
    /// Header line present but not `MQKW1 <len>`.
    BadHeader(String),
    /// Fewer payload bytes than announced.
    Truncated { expected: usize, got: usize },
    /// Bytes after the payload.
    TrailingBytes(usize),
    /// Payload is not a valid response document.
    Undecodable(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Empty => write!(f, "no result frame"),
            FrameError::BadHeader(h) => write!(f, "bad frame header {h:?}"),
            FrameError::Truncated { expected, got } => {
                write!(f, "result frame truncated ({got} of {expected} bytes)")
            }
            FrameError::TrailingBytes(n) => write!(f, "{n} unexpected bytes after result frame"),
            FrameError::Undecodable(e) => write!(f, "undecodable result frame: {e}"),
        }
    }
}

impl std::error::Error for FrameError {}

pub fn encode_frame(resp: &WorkerResponse) -> serde_json::Result<Vec<u8>> {
    let body = serde_json::to_vec(resp)?;
    let mut out = format!("{FRAME_MAGIC} {}\n", body.len()).into_bytes();
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn decode_frame(bytes: &[u8]) -> Result<WorkerResponse, FrameError> {
    if bytes.is_empty() {
        return Err(FrameError::Empty);
    }
    let Some(nl) = bytes.iter().take(MAX_HEADER_LEN).position(|b| *b == b'\n') else {
        let head = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_HEADER_LEN)]);
        // A header cut off before its newline is a truncation, not garbage.
        if FRAME_MAGIC.as_bytes().starts_with(head.as_bytes())
            || head.starts_with(FRAME_MAGIC)
        {
            return Err(FrameError::Truncated {
                expected: 0,
                got: bytes.len(),
            });
        }
        return Err(FrameError::BadHeader(head.into_owned()));
    };

    let header = String::from_utf8_lossy(&bytes[..nl]);
    let len = header
        .strip_prefix(FRAME_MAGIC)
        .and_then(|rest| rest.strip_prefix(' '))
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| FrameError::BadHeader(header.to_string()))?;

    let body = &bytes[nl + 1..];
    if body.len() < len {
        return Err(FrameError::Truncated {
            expected: len,
            got: body.len(),
        });
    }
    if body.len() > len {
        return Err(FrameError::TrailingBytes(body.len() - len));
    }
    serde_json::from_slice(body).map_err(|e| FrameError::Undecodable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_response() -> WorkerResponse {
        WorkerResponse {
            cpu_time_ms: 3,
            peak_rss_kb: 2048,
            result: WorkerResult::Ok {
                output: RawOutput::Series {
                    bits: vec![f64::NAN.to_bits(), 1.5f64.to_bits()],
                },
            },
        }
    }

    #[test]
    fn frame_preserves_nan_bits() {
        let frame = encode_frame(&ok_response()).unwrap();
        assert!(frame.starts_with(b"MQKW1 "));
        let back = decode_frame(&frame).unwrap();
        let WorkerResult::Ok {
            output: RawOutput::Series { bits },
        } = back.result
        else {
            panic!("wrong variant");
        };
        assert!(f64::from_bits(bits[0]).is_nan());
        assert_eq!(f64::from_bits(bits[1]), 1.5);
    }

    #[test]
    fn cut_payload_is_truncated_not_garbage() {
        let frame = encode_frame(&ok_response()).unwrap();
        let cut = &frame[..frame.len() - 5];
        assert!(matches!(
            decode_frame(cut),
            Err(FrameError::Truncated { .. })
        ));
        // Cut inside the header line too.
        assert!(matches!(
            decode_frame(b"MQKW"),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn stray_output_is_a_bad_header() {
        assert!(matches!(
            decode_frame(b"hello from plugin\n"),
            Err(FrameError::BadHeader(_))
        ));
        assert_eq!(decode_frame(b""), Err(FrameError::Empty));
    }

    #[test]
    fn extra_bytes_after_frame_are_rejected() {
        let mut frame = encode_frame(&ok_response()).unwrap();
        frame.extend_from_slice(b"xx");
        assert_eq!(decode_frame(&frame), Err(FrameError::TrailingBytes(2)));
    }

    #[test]
    fn error_results_use_status_tag() {
        let resp = WorkerResponse {
            cpu_time_ms: 0,
            peak_rss_kb: 0,
            result: WorkerResult::PluginError {
                message: "boom".to_string(),
            },
        };
        let frame = encode_frame(&resp).unwrap();
        let text = String::from_utf8(frame).unwrap();
        assert!(text.contains(r#""status":"plugin_error""#), "got: {text}");
    }
}

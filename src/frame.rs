//! Wire-frame parsing for the streaming conversation protocol.
//!
//! The stream is line-delimited UTF-8 text. Each complete line starting with
//! the `data:` marker is a candidate frame carrying a JSON payload; everything
//! else (SSE `event:` lines, blanks, comments) is ignored. Input arrives in
//! arbitrarily sized chunks, so parsing takes an explicit carry-over buffer
//! and returns the updated remainder alongside the decoded frames.
//!
//! The payload comes in two shapes, both accepted here:
//!
//! - enveloped, as the dashboard backend emits it:
//!   `{"event":"message","data":{"response":"...","progress":42.0}}`
//! - flat: `{"response":"...","progress":42.0,"complete":false}`
//!
//! `response` always carries the full cumulative text, never a delta.

use serde::Deserialize;
use serde_json::Value;

use crate::observability::{FRAMES_DROPPED, FRAMES_PARSED};

/// Marker that prefixes every candidate frame line.
pub const FRAME_MARKER: &str = "data:";

/// Terminal sentinel payload ending the logical stream.
pub const STREAM_SENTINEL: &str = "[DONE]";

/// One parsed unit of the streaming wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Cumulative text so far, with an optional progress percentage.
    Progress {
        /// Full response text up to this point.
        text: String,
        /// Progress in percent, clamped to 0..=100, if the frame carried one.
        progress: Option<f32>,
    },

    /// The response is finished. Carries the final cumulative text, which may
    /// be empty when the completion signal has no payload of its own.
    Complete {
        /// Final response text, possibly empty.
        text: String,
    },

    /// The remote side reported an error; no further frames are meaningful.
    Error {
        /// Error description from the remote side.
        message: String,
    },
}

/// Result of feeding one chunk through the parser.
#[derive(Debug, Default, PartialEq)]
pub struct ParseOutput {
    /// Frames decoded from complete lines, in wire order.
    pub frames: Vec<Frame>,

    /// Unconsumed trailing bytes of an incomplete line. Feed these back in
    /// as the carry-over of the next call.
    pub carry: Vec<u8>,

    /// True once the terminal sentinel was seen. Any bytes after it were
    /// discarded and the carry-over is empty.
    pub terminated: bool,
}

/// Parse one chunk of stream data, resuming from `carry`.
///
/// Pure: all state lives in the carry-over the caller threads through.
/// A frame split across chunk boundaries (even mid UTF-8 sequence) is
/// reassembled once its closing newline arrives; a structurally invalid
/// candidate line is dropped and parsing continues with the next line.
pub fn parse_chunk(carry: &[u8], chunk: &[u8]) -> ParseOutput {
    let mut buf = Vec::with_capacity(carry.len() + chunk.len());
    buf.extend_from_slice(carry);
    buf.extend_from_slice(chunk);

    let mut frames = Vec::new();
    let mut terminated = false;
    let mut start = 0;

    while let Some(offset) = buf[start..].iter().position(|&b| b == b'\n') {
        let line = &buf[start..start + offset];
        start += offset + 1;
        match parse_line(line) {
            LineOutcome::Frame(frame) => {
                FRAMES_PARSED.click();
                frames.push(frame);
            }
            LineOutcome::Sentinel => {
                terminated = true;
                break;
            }
            LineOutcome::Skip => {}
        }
    }

    let carry = if terminated {
        Vec::new()
    } else {
        buf[start..].to_vec()
    };
    ParseOutput {
        frames,
        carry,
        terminated,
    }
}

enum LineOutcome {
    Frame(Frame),
    Sentinel,
    Skip,
}

fn parse_line(line: &[u8]) -> LineOutcome {
    let Ok(text) = std::str::from_utf8(line) else {
        FRAMES_DROPPED.click();
        return LineOutcome::Skip;
    };
    let text = text.trim();
    let Some(payload) = text.strip_prefix(FRAME_MARKER) else {
        // Not a candidate frame: event name lines, blanks, comments.
        return LineOutcome::Skip;
    };
    let payload = payload.trim();
    if payload == STREAM_SENTINEL {
        return LineOutcome::Sentinel;
    }
    match decode_payload(payload) {
        Some(frame) => LineOutcome::Frame(frame),
        None => {
            FRAMES_DROPPED.click();
            LineOutcome::Skip
        }
    }
}

/// Loosely structured frame payload body.
///
/// `error` is a raw value because the backend sends both a boolean flag on
/// otherwise ordinary progress frames and a string description on dedicated
/// error frames.
#[derive(Debug, Default, Deserialize)]
struct WireBody {
    response: Option<String>,
    progress: Option<f64>,
    complete: Option<bool>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    event: Option<String>,
    data: Option<WireBody>,
}

fn decode_payload(payload: &str) -> Option<Frame> {
    if let Ok(envelope) = serde_json::from_str::<WireEnvelope>(payload) {
        if let (Some(event), Some(body)) = (envelope.event, envelope.data) {
            return frame_from_event(&event, body);
        }
    }
    let body = serde_json::from_str::<WireBody>(payload).ok()?;
    frame_from_body(body)
}

fn frame_from_event(event: &str, body: WireBody) -> Option<Frame> {
    match event {
        "complete" => Some(Frame::Complete {
            text: body.response.unwrap_or_default(),
        }),
        "error" => Some(Frame::Error {
            message: error_text(body.error),
        }),
        // Within a "message" event an inline completion flag still wins;
        // the most recently parsed signal is authoritative.
        "message" => frame_from_body(body),
        _ => None,
    }
}

fn frame_from_body(body: WireBody) -> Option<Frame> {
    if body.complete == Some(true) {
        return Some(Frame::Complete {
            text: body.response.unwrap_or_default(),
        });
    }
    if let Some(text) = body.response {
        return Some(Frame::Progress {
            text,
            progress: body.progress.map(clamp_progress),
        });
    }
    if let Some(Value::String(message)) = body.error {
        return Some(Frame::Error { message });
    }
    None
}

fn error_text(error: Option<Value>) -> String {
    match error {
        Some(Value::String(message)) => message,
        Some(other) => other.to_string(),
        None => "remote stream error".to_string(),
    }
}

fn clamp_progress(value: f64) -> f32 {
    value.clamp(0.0, 100.0) as f32
}

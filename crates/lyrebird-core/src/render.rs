//! Turns a matched stub's response spec into concrete response messages.

use std::time::Duration;

use serde_json::Value;

use crate::error::{LyrebirdError, LyrebirdResult};
use crate::method::ConnectionType;
use crate::stub::{ResponseMode, ResponseSpec};
use crate::template;

/// Whether the transport expects exactly one response message or a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputShape {
    Single,
    Stream,
}

impl OutputShape {
    pub fn for_connection(ty: ConnectionType) -> Self {
        if ty.streaming_output() {
            Self::Stream
        } else {
            Self::Single
        }
    }
}

/// Messages ready for encoding, plus the pause applied before each
/// streamed message.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedResponse {
    pub messages: Vec<Value>,
    pub delay: Option<Duration>,
}

/// Renders `spec` against the decoded request payload.
///
/// Stream-only modes (`fill_stream`, `repeat`, `no_body`) on a
/// single-message output fail with the wire-visible
/// "Found stream response for unary output" error. The failure leaves
/// the stub's budget untouched, so a misconfigured stub keeps failing
/// the same way on every call.
pub fn render(
    spec: &ResponseSpec,
    request: &Value,
    shape: OutputShape,
) -> LyrebirdResult<RenderedResponse> {
    if shape == OutputShape::Single && spec.mode != ResponseMode::Fill {
        return Err(LyrebirdError::StreamResponseForUnary);
    }

    let delay = match shape {
        OutputShape::Single => None,
        OutputShape::Stream => spec.delay()?,
    };

    let messages = match spec.mode {
        ResponseMode::Fill => {
            vec![template::interpolate(data(spec)?, request)?]
        }
        ResponseMode::FillStream => match data(spec)? {
            Value::Array(items) => items
                .iter()
                .map(|item| template::interpolate(item, request))
                .collect::<LyrebirdResult<Vec<_>>>()?,
            _ => {
                return Err(LyrebirdError::InvalidArgument(
                    "fill_stream response data must be an array".into(),
                ))
            }
        },
        ResponseMode::Repeat => {
            let count = spec.repeats.unwrap_or(0) as usize;
            let message = template::interpolate(data(spec)?, request)?;
            vec![message; count]
        }
        ResponseMode::NoBody => Vec::new(),
    };

    Ok(RenderedResponse { messages, delay })
}

fn data(spec: &ResponseSpec) -> LyrebirdResult<&Value> {
    spec.data.as_ref().ok_or_else(|| {
        LyrebirdError::InvalidArgument(format!("{:?} response requires data", spec.mode))
    })
}

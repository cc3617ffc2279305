//! ComfyUI WebSocket frame decoding.
//!
//! A frame that is valid UTF-8 and starts with `{` is a JSON control
//! message shaped `{"type": "<kind>", "data": {...}}`. Anything else is a
//! binary payload whose first [`BINARY_HEADER_LEN`] bytes are a backend
//! framing header followed by the encoded image.

use serde::Deserialize;

use crate::error::ComfyUIError;

/// Bytes prepended by ComfyUI to every binary frame. Opaque; always skipped.
pub const BINARY_HEADER_LEN: usize = 8;

/// A decoded WebSocket frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// `executing`: the prompt moved to `node`, or finished when `None`.
    Progress {
        prompt_id: String,
        node: Option<String>,
    },

    /// `progress`: step-level progress within the running node.
    Step { value: i64, max: i64 },

    /// `execution_error`: the prompt failed inside the backend.
    ExecutionError {
        prompt_id: String,
        node_id: String,
        message: String,
    },

    /// Binary payload with the header already stripped.
    ImageChunk { bytes: Vec<u8> },

    /// Any other JSON message type (`status`, `executed`, ...).
    Other { kind: String },
}

/// The `{type, data}` envelope shared by all JSON frames.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Payload for `executing` messages.
///
/// When `node` is `None`, execution of the prompt has completed.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    pub prompt_id: String,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: i64,
    /// Total number of steps.
    pub max: i64,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    pub exception_message: String,
}

/// Whether a raw frame is a JSON control message rather than binary data.
pub fn is_json_frame(frame: &[u8]) -> bool {
    frame.first() == Some(&b'{') && std::str::from_utf8(frame).is_ok()
}

/// Decode one raw frame into a [`StreamEvent`].
///
/// Fails with [`ComfyUIError::Protocol`] for malformed JSON, an
/// `executing`/`execution_error` payload of the wrong shape, or a binary
/// frame too short to hold the header.
pub fn decode_frame(frame: &[u8]) -> Result<StreamEvent, ComfyUIError> {
    if !is_json_frame(frame) {
        let bytes = frame.get(BINARY_HEADER_LEN..).ok_or_else(|| {
            ComfyUIError::Protocol(format!(
                "Binary frame of {} bytes is shorter than its {BINARY_HEADER_LEN}-byte header",
                frame.len()
            ))
        })?;
        return Ok(StreamEvent::ImageChunk {
            bytes: bytes.to_vec(),
        });
    }

    let envelope: Envelope = serde_json::from_slice(frame)
        .map_err(|e| ComfyUIError::Protocol(format!("Malformed JSON frame: {e}")))?;

    match envelope.kind.as_str() {
        "executing" => {
            let data: ExecutingData = payload(&envelope)?;
            Ok(StreamEvent::Progress {
                prompt_id: data.prompt_id,
                node: data.node,
            })
        }
        "execution_error" => {
            let data: ErrorData = payload(&envelope)?;
            Ok(StreamEvent::ExecutionError {
                prompt_id: data.prompt_id,
                node_id: data.node_id.unwrap_or_default(),
                message: data.exception_message,
            })
        }
        "progress" => match serde_json::from_value::<ProgressData>(envelope.data) {
            Ok(data) => Ok(StreamEvent::Step {
                value: data.value,
                max: data.max,
            }),
            Err(_) => Ok(StreamEvent::Other {
                kind: envelope.kind,
            }),
        },
        _ => Ok(StreamEvent::Other {
            kind: envelope.kind,
        }),
    }
}

fn payload<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Result<T, ComfyUIError> {
    T::deserialize(&envelope.data).map_err(|e| {
        ComfyUIError::Protocol(format!("Unexpected '{}' payload: {e}", envelope.kind))
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn executing_with_node() {
        let frame = br#"{"type":"executing","data":{"node":"42","prompt_id":"xyz"}}"#;
        assert_eq!(
            decode_frame(frame).unwrap(),
            StreamEvent::Progress {
                prompt_id: "xyz".into(),
                node: Some("42".into()),
            }
        );
    }

    #[test]
    fn executing_finished() {
        let frame = br#"{"type":"executing","data":{"node":null,"prompt_id":"xyz"}}"#;
        assert_matches!(
            decode_frame(frame).unwrap(),
            StreamEvent::Progress { node: None, .. }
        );
    }

    #[test]
    fn binary_frame_drops_exactly_the_header() {
        let payload = b"\x89PNG image body";
        let mut frame = vec![0, 0, 0, 1, 0, 0, 0, 2];
        frame.extend_from_slice(payload);

        assert_eq!(
            decode_frame(&frame).unwrap(),
            StreamEvent::ImageChunk {
                bytes: payload.to_vec()
            }
        );
    }

    #[test]
    fn header_only_frame_yields_empty_image() {
        assert_eq!(
            decode_frame(&[0u8; 8]).unwrap(),
            StreamEvent::ImageChunk { bytes: Vec::new() }
        );
    }

    #[test]
    fn short_binary_frame_is_protocol_error() {
        assert_matches!(decode_frame(&[1, 2, 3]), Err(ComfyUIError::Protocol(_)));
    }

    #[test]
    fn non_utf8_frame_starting_with_brace_is_binary() {
        let frame = [b'{', 0xff, 0xfe, 0, 0, 0, 0, 0, 9, 9];
        assert_matches!(
            decode_frame(&frame).unwrap(),
            StreamEvent::ImageChunk { bytes } if bytes == vec![9, 9]
        );
    }

    #[test]
    fn malformed_json_is_protocol_error() {
        assert_matches!(
            decode_frame(b"{not json"),
            Err(ComfyUIError::Protocol(msg)) if msg.contains("Malformed")
        );
    }

    #[test]
    fn executing_without_prompt_id_is_protocol_error() {
        assert_matches!(
            decode_frame(br#"{"type":"executing","data":{"node":"3"}}"#),
            Err(ComfyUIError::Protocol(msg)) if msg.contains("executing")
        );
    }

    #[test]
    fn execution_error_is_decoded() {
        let frame = br#"{"type":"execution_error","data":{"prompt_id":"abc","node_id":"5","exception_message":"out of memory","exception_type":"RuntimeError"}}"#;
        assert_eq!(
            decode_frame(frame).unwrap(),
            StreamEvent::ExecutionError {
                prompt_id: "abc".into(),
                node_id: "5".into(),
                message: "out of memory".into(),
            }
        );
    }

    #[test]
    fn progress_is_decoded() {
        let frame = br#"{"type":"progress","data":{"value":5,"max":20}}"#;
        assert_eq!(
            decode_frame(frame).unwrap(),
            StreamEvent::Step { value: 5, max: 20 }
        );
    }

    #[test]
    fn unrelated_types_are_passed_through() {
        let frame = br#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":3}}}}"#;
        assert_matches!(
            decode_frame(frame).unwrap(),
            StreamEvent::Other { kind } if kind == "status"
        );
    }
}

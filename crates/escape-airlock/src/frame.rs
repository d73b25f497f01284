// ABOUTME: Inbound event-stream frame parsing
// ABOUTME: Maps the ship's JSON responses onto typed frames keyed by request id

use serde_json::{Map, Value};

use crate::error::AirlockError;

/// One message received on the channel's event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    PokeAck { id: u64 },
    PokeErr { id: u64, err: String },
    SubscribeAck { id: u64 },
    SubscribeErr { id: u64, err: String },
    Fact { id: u64, json: Value },
    Quit { id: u64 },
    Unrecognized { id: u64, response: Option<String> },
}

impl InboundFrame {
    pub fn id(&self) -> u64 {
        match self {
            InboundFrame::PokeAck { id }
            | InboundFrame::PokeErr { id, .. }
            | InboundFrame::SubscribeAck { id }
            | InboundFrame::SubscribeErr { id, .. }
            | InboundFrame::Fact { id, .. }
            | InboundFrame::Quit { id }
            | InboundFrame::Unrecognized { id, .. } => *id,
        }
    }
}

/// Parse the data of one stream message.
///
/// Returns `Ok(None)` for messages without an id; those carry nothing to
/// correlate and are skipped. A body that isn't a JSON object is an error.
pub fn parse_frame(data: &str) -> Result<Option<InboundFrame>, AirlockError> {
    let value: Value = serde_json::from_str(data)?;
    let Value::Object(obj) = value else {
        return Err(AirlockError::Encode("frame is not a JSON object".into()));
    };

    let Some(id) = obj.get("id").and_then(parse_id) else {
        return Ok(None);
    };

    let response = obj.get("response").and_then(Value::as_str);
    let frame = match response {
        Some("poke") => {
            if obj.contains_key("ok") {
                InboundFrame::PokeAck { id }
            } else if let Some(err) = obj.get("err") {
                InboundFrame::PokeErr {
                    id,
                    err: error_text(err),
                }
            } else {
                InboundFrame::PokeErr {
                    id,
                    err: "malformed poke response".to_string(),
                }
            }
        }
        Some("subscribe") => match obj.get("err") {
            Some(err) => InboundFrame::SubscribeErr {
                id,
                err: error_text(err),
            },
            None => InboundFrame::SubscribeAck { id },
        },
        Some("diff") => InboundFrame::Fact {
            id,
            json: take_json(obj),
        },
        Some("quit") => InboundFrame::Quit { id },
        other => InboundFrame::Unrecognized {
            id,
            response: other.map(str::to_string),
        },
    };

    Ok(Some(frame))
}

/// Ids arrive as numbers, but some ships stringify them.
fn parse_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Err payloads are usually a string; tangs come through as arrays of lines.
fn error_text(err: &Value) -> String {
    match err {
        Value::String(s) => s.clone(),
        Value::Array(lines) if lines.iter().all(Value::is_string) => lines
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn take_json(mut obj: Map<String, Value>) -> Value {
    obj.remove("json").unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poke_ok_with_null() {
        let frame = parse_frame(r#"{"id": 7, "response": "poke", "ok": null}"#).unwrap();
        assert_eq!(frame, Some(InboundFrame::PokeAck { id: 7 }));
    }

    #[test]
    fn test_poke_err() {
        let frame = parse_frame(r#"{"id": 7, "response": "poke", "err": "reason"}"#).unwrap();
        assert_eq!(
            frame,
            Some(InboundFrame::PokeErr {
                id: 7,
                err: "reason".into()
            })
        );
    }

    #[test]
    fn test_poke_without_ok_or_err_is_failure() {
        let frame = parse_frame(r#"{"id": 3, "response": "poke"}"#).unwrap();
        assert!(matches!(frame, Some(InboundFrame::PokeErr { id: 3, .. })));
    }

    #[test]
    fn test_tang_err_joined() {
        let frame =
            parse_frame(r#"{"id": 2, "response": "subscribe", "err": ["line one", "line two"]}"#)
                .unwrap();
        assert_eq!(
            frame,
            Some(InboundFrame::SubscribeErr {
                id: 2,
                err: "line one\nline two".into()
            })
        );
    }

    #[test]
    fn test_subscribe_ok() {
        let frame = parse_frame(r#"{"id": 2, "response": "subscribe", "ok": "ok"}"#).unwrap();
        assert_eq!(frame, Some(InboundFrame::SubscribeAck { id: 2 }));
    }

    #[test]
    fn test_diff_carries_json() {
        let frame =
            parse_frame(r#"{"id": 4, "response": "diff", "json": {"add-nodes": {}}}"#).unwrap();
        assert_eq!(
            frame,
            Some(InboundFrame::Fact {
                id: 4,
                json: serde_json::json!({"add-nodes": {}})
            })
        );
    }

    #[test]
    fn test_quit() {
        let frame = parse_frame(r#"{"id": 4, "response": "quit"}"#).unwrap();
        assert_eq!(frame, Some(InboundFrame::Quit { id: 4 }));
    }

    #[test]
    fn test_missing_id_is_skipped() {
        assert_eq!(parse_frame(r#"{"response": "diff", "json": 1}"#).unwrap(), None);
        assert_eq!(parse_frame(r#"{"id": null, "response": "quit"}"#).unwrap(), None);
    }

    #[test]
    fn test_string_id_accepted() {
        let frame = parse_frame(r#"{"id": "12", "response": "quit"}"#).unwrap();
        assert_eq!(frame.map(|f| f.id()), Some(12));
    }

    #[test]
    fn test_unknown_response() {
        let frame = parse_frame(r#"{"id": 1, "response": "kick"}"#).unwrap();
        assert_eq!(
            frame,
            Some(InboundFrame::Unrecognized {
                id: 1,
                response: Some("kick".into())
            })
        );
    }

    #[test]
    fn test_malformed_body() {
        assert!(parse_frame("not json").is_err());
        assert!(parse_frame("[1, 2]").is_err());
    }
}

// ABOUTME: Outbound channel commands and batch encoding
// ABOUTME: Each PUT to the channel carries a JSON array of these commands

use serde::Serialize;
use serde_json::Value;

use crate::error::AirlockError;

/// A command written to the channel.
///
/// Serializes with an `action` tag, e.g.
/// `{"action":"poke","id":1,"ship":"zod","app":"hood","mark":"helm-hi","json":"hi"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Command {
    Poke {
        id: u64,
        ship: String,
        app: String,
        mark: String,
        json: Value,
    },
    Subscribe {
        id: u64,
        ship: String,
        app: String,
        path: String,
    },
    Unsubscribe {
        id: u64,
        subscription: u64,
    },
    /// Acknowledges every event up to and including `event_id`. Consumes no id.
    Ack {
        #[serde(rename = "event-id")]
        event_id: u64,
    },
    /// Asks the ship to discard the channel.
    Delete { id: u64 },
}

impl Command {
    /// The id this command consumed, if any.
    pub fn id(&self) -> Option<u64> {
        match self {
            Command::Poke { id, .. }
            | Command::Subscribe { id, .. }
            | Command::Unsubscribe { id, .. }
            | Command::Delete { id } => Some(*id),
            Command::Ack { .. } => None,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Command::Poke { .. } => "poke",
            Command::Subscribe { .. } => "subscribe",
            Command::Unsubscribe { .. } => "unsubscribe",
            Command::Ack { .. } => "ack",
            Command::Delete { .. } => "delete",
        }
    }
}

/// Serialize a batch of commands into the body of one channel write.
pub fn encode_batch(commands: &[Command]) -> Result<String, AirlockError> {
    Ok(serde_json::to_string(commands)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_json(command: &Command) -> Value {
        serde_json::to_value(command).unwrap()
    }

    #[test]
    fn test_poke_wire_format() {
        let poke = Command::Poke {
            id: 1,
            ship: "zod".into(),
            app: "hood".into(),
            mark: "helm-hi".into(),
            json: json!("Opening API channel"),
        };
        assert_eq!(
            as_json(&poke),
            json!({
                "action": "poke",
                "id": 1,
                "ship": "zod",
                "app": "hood",
                "mark": "helm-hi",
                "json": "Opening API channel",
            })
        );
    }

    #[test]
    fn test_subscribe_wire_format() {
        let subscribe = Command::Subscribe {
            id: 2,
            ship: "zod".into(),
            app: "graph-store".into(),
            path: "/updates".into(),
        };
        assert_eq!(
            as_json(&subscribe),
            json!({"action": "subscribe", "id": 2, "ship": "zod", "app": "graph-store", "path": "/updates"})
        );
    }

    #[test]
    fn test_unsubscribe_wire_format() {
        let unsubscribe = Command::Unsubscribe {
            id: 5,
            subscription: 2,
        };
        assert_eq!(
            as_json(&unsubscribe),
            json!({"action": "unsubscribe", "id": 5, "subscription": 2})
        );
    }

    #[test]
    fn test_ack_has_no_id() {
        let ack = Command::Ack { event_id: 21 };
        assert_eq!(as_json(&ack), json!({"action": "ack", "event-id": 21}));
        assert_eq!(ack.id(), None);
    }

    #[test]
    fn test_delete_wire_format() {
        assert_eq!(
            as_json(&Command::Delete { id: 9 }),
            json!({"action": "delete", "id": 9})
        );
    }

    #[test]
    fn test_encode_batch_is_array() {
        let body = encode_batch(&[
            Command::Ack { event_id: 3 },
            Command::Unsubscribe {
                id: 4,
                subscription: 1,
            },
        ])
        .unwrap();
        let parsed: Value = serde_json::from_str(&body).unwrap();
        let items = parsed.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["action"], "ack");
        assert_eq!(items[1]["action"], "unsubscribe");
    }

    #[test]
    fn test_action_names_match_tags() {
        let commands = [
            Command::Poke {
                id: 1,
                ship: "zod".into(),
                app: "a".into(),
                mark: "m".into(),
                json: Value::Null,
            },
            Command::Subscribe {
                id: 2,
                ship: "zod".into(),
                app: "a".into(),
                path: "/".into(),
            },
            Command::Unsubscribe {
                id: 3,
                subscription: 2,
            },
            Command::Ack { event_id: 3 },
            Command::Delete { id: 4 },
        ];
        for command in &commands {
            assert_eq!(as_json(command)["action"], command.action());
        }
    }
}

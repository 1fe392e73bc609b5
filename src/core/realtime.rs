use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::config::TablesConfig;

pub const PHOENIX_TOPIC: &str = "phoenix";

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_POSTGRES_CHANGES: &str = "postgres_changes";

/// Phoenix channel frame as exchanged with the realtime socket (serializer vsn 1.0.0)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    pub fn join(topic: &str, msg_ref: String, payload: Value) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_JOIN.to_string(),
            payload,
            join_ref: Some(msg_ref.clone()),
            msg_ref: Some(msg_ref),
        }
    }

    pub fn leave(topic: &str, msg_ref: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_LEAVE.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref),
            join_ref: None,
        }
    }

    pub fn heartbeat(msg_ref: String) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref),
            join_ref: None,
        }
    }

    /// `Some(true)` for an ok reply, `Some(false)` for an error reply, `None` if not a reply
    pub fn reply_ok(&self) -> Option<bool> {
        if self.event != EVENT_REPLY {
            return None;
        }
        Some(self.payload.get("status").and_then(Value::as_str) == Some("ok"))
    }

    /// Human readable reason carried by an error reply
    pub fn reply_reason(&self) -> String {
        self.payload
            .pointer("/response/reason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.payload.to_string())
    }

    /// Server answer to the heartbeat sent with `msg_ref`
    pub fn is_heartbeat_reply(&self, msg_ref: &str) -> bool {
        self.topic == PHOENIX_TOPIC
            && self.event == EVENT_REPLY
            && self.msg_ref.as_deref() == Some(msg_ref)
    }

    pub fn is_channel_failure(&self) -> bool {
        self.event == EVENT_ERROR || self.event == EVENT_CLOSE
    }
}

/// Kind of row change reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Synthesized after a reconnect; changes may have been missed
    Resync,
}

impl ChangeKind {
    fn from_wire(value: &str) -> Option<Self> {
        match value {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

/// Table and kind of a `postgres_changes` frame, if the frame is one
pub fn decode_postgres_change(message: &PhoenixMessage) -> Option<(String, ChangeKind)> {
    if message.event != EVENT_POSTGRES_CHANGES {
        return None;
    }
    let data = message.payload.get("data")?;
    let table = data.get("table").and_then(Value::as_str)?.to_string();
    let kind = data
        .get("type")
        .or_else(|| data.get("eventType"))
        .and_then(Value::as_str)
        .and_then(ChangeKind::from_wire)?;
    Some((table, kind))
}

/// Channel topic for one tenant subscription
pub fn tenant_topic(tenant_id: &str, suffix: &str) -> String {
    format!("realtime:sessions:{}:{}", tenant_id, suffix)
}

/// Join payload listening to session and message rows of a tenant
pub fn join_payload(tables: &TablesConfig, tenant_id: &str, access_token: Option<&str>) -> Value {
    let filter = format!("{}=eq.{}", tables.tenant_column, tenant_id);
    let mut payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [
                { "event": "*", "schema": "public", "table": tables.sessions, "filter": filter },
                { "event": "*", "schema": "public", "table": tables.messages, "filter": filter },
            ]
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = Value::String(token.to_string());
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_frame_shape() {
        let tables = TablesConfig::default();
        let msg = PhoenixMessage::join(
            &tenant_topic("company-1", "abc"),
            "1".to_string(),
            join_payload(&tables, "company-1", Some("jwt")),
        );
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["event"], "phx_join");
        assert_eq!(value["ref"], "1");
        assert_eq!(value["join_ref"], "1");
        assert_eq!(value["topic"], "realtime:sessions:company-1:abc");
        assert_eq!(value["payload"]["access_token"], "jwt");

        let changes = value["payload"]["config"]["postgres_changes"].as_array().unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0]["table"], "whatsapp_sessions");
        assert_eq!(changes[1]["table"], "whatsapp_messages");
        assert_eq!(changes[0]["filter"], "company_id=eq.company-1");
    }

    #[test]
    fn test_heartbeat_omits_join_ref() {
        let value = serde_json::to_value(PhoenixMessage::heartbeat("7".to_string())).unwrap();
        assert_eq!(value["topic"], "phoenix");
        assert_eq!(value["event"], "heartbeat");
        assert!(value.get("join_ref").is_none());
    }

    #[test]
    fn test_decode_postgres_change() {
        let text = r#"{
            "topic": "realtime:sessions:company-1:abc",
            "event": "postgres_changes",
            "payload": {
                "ids": [12],
                "data": {
                    "schema": "public",
                    "table": "whatsapp_messages",
                    "commit_timestamp": "2024-05-01T10:00:00Z",
                    "type": "INSERT",
                    "record": { "id": "m1" }
                }
            },
            "ref": null
        }"#;
        let msg: PhoenixMessage = serde_json::from_str(text).unwrap();
        let (table, kind) = decode_postgres_change(&msg).unwrap();
        assert_eq!(table, "whatsapp_messages");
        assert_eq!(kind, ChangeKind::Insert);
    }

    #[test]
    fn test_non_change_frames_ignored() {
        let msg: PhoenixMessage = serde_json::from_str(
            r#"{"topic":"phoenix","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"3"}"#,
        )
        .unwrap();
        assert!(decode_postgres_change(&msg).is_none());
        assert_eq!(msg.reply_ok(), Some(true));
        assert!(msg.is_heartbeat_reply("3"));
        assert!(!msg.is_heartbeat_reply("4"));
    }

    #[test]
    fn test_error_reply_reason() {
        let msg: PhoenixMessage = serde_json::from_str(
            r#"{"topic":"t","event":"phx_reply","payload":{"status":"error","response":{"reason":"unauthorized"}},"ref":"1"}"#,
        )
        .unwrap();
        assert_eq!(msg.reply_ok(), Some(false));
        assert_eq!(msg.reply_reason(), "unauthorized");
        assert!(!msg.is_heartbeat_reply("1"));
    }
}

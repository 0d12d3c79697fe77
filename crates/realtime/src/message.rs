use serde::{Deserialize, Serialize};

/// A frame sent or received over the websocket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub event: ChannelEvent,
    pub payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    pub message_ref: serde_json::Value,
}

/// Row-change and protocol events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelEvent {
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "*")]
    All,
    #[serde(rename = "postgres_changes")]
    PostgresChanges,
    #[serde(rename = "broadcast")]
    Broadcast,
    #[serde(rename = "phx_join")]
    PhoenixJoin,
    #[serde(rename = "phx_leave")]
    PhoenixLeave,
    #[serde(rename = "phx_reply")]
    PhoenixReply,
    #[serde(rename = "phx_error")]
    PhoenixError,
    #[serde(rename = "phx_close")]
    PhoenixClose,
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "access_token")]
    AccessToken,
    #[serde(other)]
    Other,
}

impl ChannelEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::All => "*",
            Self::PostgresChanges => "postgres_changes",
            Self::Broadcast => "broadcast",
            Self::PhoenixJoin => "phx_join",
            Self::PhoenixLeave => "phx_leave",
            Self::PhoenixReply => "phx_reply",
            Self::PhoenixError => "phx_error",
            Self::PhoenixClose => "phx_close",
            Self::Heartbeat => "heartbeat",
            Self::AccessToken => "access_token",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a callback receives
///
/// For row changes `event_type` is `INSERT`, `UPDATE` or `DELETE` and `data`
/// holds `record` and `old_record`. For broadcasts `event_type` is the
/// broadcast event name and `data` is the sender's payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub data: serde_json::Value,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub timestamp: Option<String>,
}

impl Payload {
    /// The new row of an insert or update
    pub fn record(&self) -> Option<&serde_json::Value> {
        self.data.get("record").filter(|r| !r.is_null())
    }

    /// The previous row of an update or delete
    pub fn old_record(&self) -> Option<&serde_json::Value> {
        self.data.get("old_record").filter(|r| !r.is_null())
    }

    pub(crate) fn from_postgres_changes(payload: &serde_json::Value) -> Self {
        let data = payload.get("data").cloned().unwrap_or_else(|| payload.clone());
        let event_type = data.get("type").and_then(|v| v.as_str()).map(String::from);
        let timestamp = data
            .get("commit_timestamp")
            .and_then(|v| v.as_str())
            .map(String::from);
        Self {
            data,
            event_type,
            timestamp,
        }
    }

    pub(crate) fn from_broadcast(payload: &serde_json::Value) -> Self {
        Self {
            data: payload.get("payload").cloned().unwrap_or(serde_json::Value::Null),
            event_type: payload.get("event").and_then(|v| v.as_str()).map(String::from),
            timestamp: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_event_parses_as_other() {
        let msg: RealtimeMessage = serde_json::from_value(json!({
            "topic": "realtime:chat",
            "event": "presence_state",
            "payload": {},
            "ref": null
        }))
        .unwrap();
        assert_eq!(msg.event, ChannelEvent::Other);
    }

    #[test]
    fn test_postgres_changes_payload() {
        let payload = Payload::from_postgres_changes(&json!({
            "ids": [1],
            "data": {
                "type": "INSERT",
                "table": "chat_messages",
                "record": { "id": "m1", "message": "hi" },
                "old_record": null,
                "commit_timestamp": "2024-05-01T10:00:00Z"
            }
        }));
        assert_eq!(payload.event_type.as_deref(), Some("INSERT"));
        assert_eq!(payload.record().unwrap()["id"], "m1");
        assert!(payload.old_record().is_none());
        assert_eq!(payload.timestamp.as_deref(), Some("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn test_broadcast_payload() {
        let payload = Payload::from_broadcast(&json!({
            "type": "broadcast",
            "event": "typing",
            "payload": { "user_id": "u1", "typing": true }
        }));
        assert_eq!(payload.event_type.as_deref(), Some("typing"));
        assert_eq!(payload.data["user_id"], "u1");
    }
}

//! Push-channel wire messages.
//!
//! Every message is a JSON text frame tagged by `type`. The client sends
//! `subscribe`, `unsubscribe` and `ping`; the server sends `status_update`,
//! `subscribed` and `pong`.

use serde::{Deserialize, Serialize};

use crate::model::HealthStatus;

/// Client → server message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(skip_serializing_if = "Option::is_none")]
        service_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        environment_id: Option<String>,
    },
    Unsubscribe {
        #[serde(skip_serializing_if = "Option::is_none")]
        service_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        environment_id: Option<String>,
    },
    Ping,
}

/// Which kind of entity a subscription names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Service,
    Environment,
}

impl ClientMessage {
    pub fn subscribe(topic: Topic, id: &str) -> Self {
        let (service_id, environment_id) = topic_ids(topic, id);
        ClientMessage::Subscribe {
            service_id,
            environment_id,
        }
    }

    pub fn unsubscribe(topic: Topic, id: &str) -> Self {
        let (service_id, environment_id) = topic_ids(topic, id);
        ClientMessage::Unsubscribe {
            service_id,
            environment_id,
        }
    }

    pub fn to_json(&self) -> String {
        // Only strings and unit variants: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn topic_ids(topic: Topic, id: &str) -> (Option<String>, Option<String>) {
    match topic {
        Topic::Service => (Some(id.to_string()), None),
        Topic::Environment => (None, Some(id.to_string())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessageKind {
    StatusUpdate,
    Subscribed,
    Pong,
}

/// Server → client message as it appears on the wire. All payload fields
/// are optional; [`ServerMessage::status_update`] validates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: ServerMessageKind,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub environment_id: Option<String>,
    #[serde(default)]
    pub status: Option<HealthStatus>,
    #[serde(default)]
    pub response_time_ms: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// A validated status change for one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub service_id: String,
    pub environment_id: String,
    pub status: HealthStatus,
    pub response_time_ms: u64,
    pub timestamp: String,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Extract a status update. Returns `None` for other message kinds and
    /// for updates missing the service id, environment id or status. Empty
    /// strings count as missing. A missing response time reads as 0 and a
    /// missing timestamp as now.
    pub fn status_update(self) -> Option<StatusUpdate> {
        if self.kind != ServerMessageKind::StatusUpdate {
            return None;
        }
        Some(StatusUpdate {
            service_id: non_empty(self.service_id)?,
            environment_id: non_empty(self.environment_id)?,
            status: self.status?,
            response_time_ms: self.response_time_ms.unwrap_or(0),
            timestamp: non_empty(self.timestamp).unwrap_or_else(now_timestamp),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Current UTC time as RFC 3339 with millisecond precision.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

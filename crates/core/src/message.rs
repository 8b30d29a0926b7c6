use serde::{Deserialize, Serialize};

/// Request/response envelope layered on top of the pure publish/subscribe
/// transport. Replies echo `correlation_id` on `reply_topic`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub correlation_id: String,
    pub reply_topic: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl BusEnvelope {
    pub fn request(reply_topic: &str, payload: serde_json::Value) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            reply_topic: reply_topic.to_string(),
            payload,
        }
    }

    /// Build the reply to this envelope, carrying the same correlation id.
    pub fn reply(&self, payload: serde_json::Value) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            reply_topic: String::new(),
            payload,
        }
    }
}

/// Frames a client may send over a session, dispatched by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Opening handshake. Must be the first frame on a new connection.
    Hello,
    /// One user utterance.
    Chat { text: String },
    /// Answer to a server liveness probe.
    Pong,
}

/// Outcome of a turn as reported to the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Every dispatched capability answered.
    Answered,
    /// Some capability was unavailable or failed; the reply names them.
    Partial,
    /// The turn could not be processed at all.
    Errored,
}

/// Frames the server sends over a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake acknowledgement.
    Welcome { session_id: String },
    /// The single reply produced for one utterance.
    Reply {
        reply: String,
        turn_status: TurnStatus,
        #[serde(default)]
        degraded_capabilities: Vec<String>,
    },
    /// System/lifecycle push, e.g. capability health changes.
    Event { event: String, detail: serde_json::Value },
    /// Liveness probe; the client answers with `pong`.
    Ping,
}

impl ServerFrame {
    pub fn reply(reply: &str, turn_status: TurnStatus, degraded: Vec<String>) -> Self {
        Self::Reply {
            reply: reply.to_string(),
            turn_status,
            degraded_capabilities: degraded,
        }
    }
}

/// Result of one capability call within a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityResponse {
    pub capability: String,
    pub success: bool,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One completed request/response cycle for a single utterance, handed to
/// the persistence collaborator. Not retained by the core afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub session_id: String,
    pub intent: crate::intent::Intent,
    #[serde(default)]
    pub capability_responses: Vec<CapabilityResponse>,
    pub final_reply: String,
    pub turn_status: TurnStatus,
    pub timestamp_ms: i64,
}

/// Compressed view of a past turn, used as classifier context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnSummary {
    pub text: String,
    pub reply: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_reply_echoes_correlation_id() {
        let req = BusEnvelope::request("reply.abc", serde_json::json!({"op": "ping"}));
        let resp = req.reply(serde_json::json!({"pong": true}));
        assert_eq!(resp.correlation_id, req.correlation_id);
    }

    #[test]
    fn test_client_frame_wire_shape() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"chat","text":"hello there"}"#).unwrap();
        match frame {
            ClientFrame::Chat { text } => assert_eq!(text, "hello there"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_server_reply_wire_shape() {
        let frame = ServerFrame::reply("done", TurnStatus::Partial, vec!["weather".to_string()]);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "reply");
        assert_eq!(json["turn_status"], "partial");
        assert_eq!(json["degraded_capabilities"][0], "weather");
    }
}

//! Wire protocol for the simulation channel.
//!
//! Every frame is a JSON envelope `{ "type", "payload", "timestamp" }`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::AnalysisError;
use crate::safety::SafetyVerdict;

use super::model::{AnalysisResult, SessionState, UpdateComposition};

/// Close code: policy violation (missing or rejected ticket).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code: unexpected server condition.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// Close code: replaced by a newer connection for the same user.
pub const CLOSE_SERVICE_RESTART: u16 = 1012;
/// Close code: server going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Messages pushed from server to client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "INIT_STATE")]
    InitState(SessionState),
    #[serde(rename = "SAFETY_OK")]
    SafetyOk(SafetyVerdict),
    #[serde(rename = "SAFETY_WARNING")]
    SafetyWarning(SafetyVerdict),
    #[serde(rename = "AI_ANALYSIS_RESULT")]
    AiAnalysisResult(AnalysisResult),
    #[serde(rename = "AI_ANALYSIS_ERROR")]
    AiAnalysisError(AnalysisErrorPayload),
    #[serde(rename = "ERROR")]
    Error(ErrorPayload),
}

impl ServerMessage {
    /// `SAFETY_OK` or `SAFETY_WARNING` depending on the verdict.
    pub fn from_verdict(verdict: SafetyVerdict) -> Self {
        if verdict.is_safe {
            Self::SafetyOk(verdict)
        } else {
            Self::SafetyWarning(verdict)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Wire type tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitState(_) => "INIT_STATE",
            Self::SafetyOk(_) => "SAFETY_OK",
            Self::SafetyWarning(_) => "SAFETY_WARNING",
            Self::AiAnalysisResult(_) => "AI_ANALYSIS_RESULT",
            Self::AiAnalysisError(_) => "AI_ANALYSIS_ERROR",
            Self::Error(_) => "ERROR",
        }
    }

    /// Serialise as an envelope stamped with the current time.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::String(Utc::now().to_rfc3339()),
            );
        }
        serde_json::to_string(&value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Degraded analysis outcome as shown to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisErrorPayload {
    pub message: String,
    pub code: String,
    /// `true` when trying again later may succeed.
    pub retryable: bool,
}

impl From<&AnalysisError> for AnalysisErrorPayload {
    fn from(err: &AnalysisError) -> Self {
        Self {
            message: err.user_message().to_string(),
            code: err.code().to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// Messages received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    UpdateComposition(UpdateComposition),
    /// Any type tag this server does not handle.
    Unknown(String),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not a JSON envelope.
    #[error("unparseable frame: {0}")]
    Unparseable(#[source] serde_json::Error),
    /// A binary frame that is not UTF-8 text.
    #[error("frame is not UTF-8: {0}")]
    NotUtf8(#[source] std::str::Utf8Error),
    /// The envelope is well formed but its payload is not.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl ProtocolError {
    /// Text for the `ERROR` message sent back to the client.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unparseable(_) | Self::NotUtf8(_) => "消息格式错误",
            Self::InvalidPayload(_) => "消息格式无效",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClientEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

impl ClientMessage {
    /// Parse a raw frame. Binary frames must carry UTF-8 JSON.
    pub fn parse_bytes(frame: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(frame).map_err(ProtocolError::NotUtf8)?;
        Self::parse(text)
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: ClientEnvelope =
            serde_json::from_str(text).map_err(ProtocolError::Unparseable)?;

        match envelope.kind.as_str() {
            "UPDATE_COMPOSITION" => {
                let payload = envelope
                    .payload
                    .ok_or_else(|| ProtocolError::InvalidPayload("missing payload".to_string()))?;
                let update: UpdateComposition = serde_json::from_value(payload)
                    .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?;
                if let Some(pos) = update
                    .composition
                    .iter()
                    .position(|item| item.display_name.trim().is_empty())
                {
                    return Err(ProtocolError::InvalidPayload(format!(
                        "composition item {pos} has no name"
                    )));
                }
                Ok(Self::UpdateComposition(update))
            }
            _ => Ok(Self::Unknown(envelope.kind)),
        }
    }
}

/// Close code and reason sent when the server ends a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn preempted() -> Self {
        Self::new(CLOSE_SERVICE_RESTART, "新连接已建立")
    }

    pub fn shutdown() -> Self {
        Self::new(CLOSE_GOING_AWAY, "服务器关闭")
    }
}

/// Frame handed from a session to its transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Close(CloseReason),
}

/// Frame handed from a transport to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
    /// The peer closed the channel or the transport failed.
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_parse_update() {
        let msg = ClientMessage::parse(
            r#"{"type":"UPDATE_COMPOSITION","payload":{"composition":[{"name":"甘草","dosage":"6g"}],"notes":"n"}}"#,
        )
        .unwrap();
        let ClientMessage::UpdateComposition(update) = msg else {
            panic!("expected update");
        };
        assert_eq!(update.composition[0].display_name, "甘草");
        assert_eq!(update.notes.as_deref(), Some("n"));
        assert!(update.name.is_none());
    }

    #[test]
    fn test_parse_unknown_type() {
        let msg = ClientMessage::parse(r#"{"type":"PING"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unknown("PING".to_string()));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            ClientMessage::parse("not json"),
            Err(ProtocolError::Unparseable(_))
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"UPDATE_COMPOSITION"}"#),
            Err(ProtocolError::InvalidPayload(_))
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"UPDATE_COMPOSITION","payload":{"name":"x"}}"#),
            Err(ProtocolError::InvalidPayload(_))
        ));
        assert!(matches!(
            ClientMessage::parse(
                r#"{"type":"UPDATE_COMPOSITION","payload":{"composition":[{"name":"  "}]}}"#
            ),
            Err(ProtocolError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_parse_bytes() {
        let err = ClientMessage::parse_bytes(&[0xff, 0xfe, 0x7b]).unwrap_err();
        assert!(matches!(err, ProtocolError::NotUtf8(_)));
        assert_eq!(err.user_message(), "消息格式错误");

        let msg = ClientMessage::parse_bytes(br#"{"type":"PING"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unknown("PING".to_string()));
    }

    #[test]
    fn test_frame_envelope() {
        let frame = ServerMessage::error("消息格式无效").to_frame().unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], "ERROR");
        assert_eq!(v["payload"], json!({"message": "消息格式无效"}));
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn test_kind_matches_serialized_tag() {
        let msg = ServerMessage::InitState(SessionState::new("x"));
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], msg.kind());
    }
}

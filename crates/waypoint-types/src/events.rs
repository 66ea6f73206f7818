use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ChatId, FlexValue, MessageId};

/// Raw frame as received from a client, before the payload is decoded.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    /// Present when the client expects an `ack` event for this request.
    #[serde(default)]
    pub ack: Option<u64>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DecodeError {
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("invalid {event} payload: {reason}")]
    InvalidPayload { event: &'static str, reason: String },
}

/// Target of a join request, decoded once at the edge.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinRequest {
    ByChatId { chat_id: ChatId, offset: i64 },
    /// `offset` is `None` when the client did not send one; the handshake
    /// offset then applies.
    ByPeer { peer_key: String, offset: Option<i64> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendTarget {
    Chat(ChatId),
    /// A peer user key, or a numeric-looking reference to an existing chat.
    Peer(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    pub content: String,
    pub target: SendTarget,
}

/// Commands sent FROM client TO server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    SetUserId { user_key: String },
    JoinChat(JoinRequest),
    JoinGroup { chat_id: ChatId, offset: i64 },
    ChatMessage(SendRequest),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JoinPayload {
    Object {
        #[serde(rename = "chatId")]
        chat_id: FlexValue,
        #[serde(rename = "serverOffset", default)]
        server_offset: Option<FlexValue>,
    },
    Int(i64),
    Text(String),
}

#[derive(Deserialize)]
struct SendPayload {
    #[serde(alias = "content")]
    message: Option<String>,
    send_to: Option<FlexValue>,
    #[serde(rename = "chatId")]
    chat_id: Option<FlexValue>,
}

fn invalid(event: &'static str, reason: impl Into<String>) -> DecodeError {
    DecodeError::InvalidPayload {
        event,
        reason: reason.into(),
    }
}

fn offset_of(event: &'static str, value: Option<FlexValue>) -> Result<Option<i64>, DecodeError> {
    match value {
        None => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| invalid(event, "serverOffset must be numeric")),
    }
}

impl ClientCommand {
    pub fn decode(event: &str, data: Value) -> Result<Self, DecodeError> {
        match event {
            "setUserId" => {
                let key = serde_json::from_value::<FlexValue>(data)
                    .map_err(|e| invalid("setUserId", e.to_string()))?
                    .into_string();
                if key.trim().is_empty() {
                    return Err(invalid("setUserId", "empty user id"));
                }
                Ok(ClientCommand::SetUserId { user_key: key })
            }
            "join_chat" => {
                let payload = serde_json::from_value::<JoinPayload>(data)
                    .map_err(|e| invalid("join_chat", e.to_string()))?;
                let req = match payload {
                    JoinPayload::Int(chat_id) => JoinRequest::ByChatId { chat_id, offset: 0 },
                    JoinPayload::Text(peer_key) => JoinRequest::ByPeer {
                        peer_key,
                        offset: None,
                    },
                    JoinPayload::Object {
                        chat_id,
                        server_offset,
                    } => {
                        let offset = offset_of("join_chat", server_offset)?;
                        match chat_id {
                            FlexValue::Int(chat_id) => JoinRequest::ByChatId {
                                chat_id,
                                offset: offset.unwrap_or(0),
                            },
                            FlexValue::Text(peer_key) => JoinRequest::ByPeer { peer_key, offset },
                        }
                    }
                };
                Ok(ClientCommand::JoinChat(req))
            }
            "join_group" => {
                let payload = serde_json::from_value::<JoinPayload>(data)
                    .map_err(|e| invalid("join_group", e.to_string()))?;
                let (id, offset) = match payload {
                    JoinPayload::Int(id) => (Some(id), None),
                    JoinPayload::Text(s) => (s.trim().parse().ok(), None),
                    JoinPayload::Object {
                        chat_id,
                        server_offset,
                    } => (chat_id.as_i64(), offset_of("join_group", server_offset)?),
                };
                let chat_id = id.ok_or_else(|| invalid("join_group", "chatId must be numeric"))?;
                Ok(ClientCommand::JoinGroup {
                    chat_id,
                    offset: offset.unwrap_or(0),
                })
            }
            "chat_message" => {
                let payload = serde_json::from_value::<SendPayload>(data)
                    .map_err(|e| invalid("chat_message", e.to_string()))?;
                let target = match (payload.chat_id, payload.send_to) {
                    (Some(chat_id), _) => SendTarget::Chat(
                        chat_id
                            .as_i64()
                            .ok_or_else(|| invalid("chat_message", "chatId must be numeric"))?,
                    ),
                    (None, Some(peer)) => SendTarget::Peer(peer.into_string()),
                    (None, None) => return Err(invalid("chat_message", "missing send_to or chatId")),
                };
                Ok(ClientCommand::ChatMessage(SendRequest {
                    content: payload.message.unwrap_or_default(),
                    target,
                }))
            }
            other => Err(DecodeError::UnknownEvent(other.to_string())),
        }
    }
}

// -- Server -> client --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDescriptor {
    pub room: String,
    #[serde(rename = "chatId")]
    pub chat_id: ChatId,
    #[serde(rename = "isGroup")]
    pub is_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    #[serde(rename = "peerName", skip_serializing_if = "Option::is_none")]
    pub peer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    pub message: String,
    #[serde(rename = "serverOffset")]
    pub server_offset: MessageId,
    pub send_to: String,
    pub send_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "chatId")]
    pub chat_id: ChatId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub sender: String,
    #[serde(rename = "chatId")]
    pub chat_id: ChatId,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<bool>,
    #[serde(rename = "serverOffset", skip_serializing_if = "Option::is_none")]
    pub server_offset: Option<MessageId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckPayload {
    pub ack: u64,
    pub status: AckStatus,
    #[serde(rename = "serverOffset", skip_serializing_if = "Option::is_none")]
    pub server_offset: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Events sent over the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Connection identity resolved
    #[serde(rename = "auth")]
    Identified { user_id: String },

    #[serde(rename = "join_chat")]
    JoinChat(RoomDescriptor),

    #[serde(rename = "join_group")]
    JoinGroup(RoomDescriptor),

    #[serde(rename = "chat_message")]
    ChatMessage(ChatMessagePayload),

    #[serde(rename = "receiveNotification")]
    ReceiveNotification(NotificationPayload),

    #[serde(rename = "chat_error")]
    ChatError { message: String },

    #[serde(rename = "ack")]
    Ack(AckPayload),
}

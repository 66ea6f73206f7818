use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ChatId = i64;
pub type MessageId = i64;

/// Opaque user identifier issued by the identity service.
///
/// Clients send it either as a JSON string or as an integer; both decode to
/// the same textual key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "FlexValue", into = "String")]
pub struct UserKey(pub String);

impl UserKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<UserKey> for String {
    fn from(key: UserKey) -> Self {
        key.0
    }
}

impl From<FlexValue> for UserKey {
    fn from(value: FlexValue) -> Self {
        UserKey(value.into_string())
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is on the other end of a connection or request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_key: String,
    pub display_name: Option<String>,
}

impl Identity {
    /// Identity taken from the client's own claim, without a display name.
    pub fn declared(user_key: impl Into<String>) -> Self {
        Self {
            user_key: user_key.into(),
            display_name: None,
        }
    }
}

/// A JSON scalar that may arrive as a number or as a string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FlexValue {
    Int(i64),
    Text(String),
}

impl FlexValue {
    pub fn into_string(self) -> String {
        match self {
            FlexValue::Int(n) => n.to_string(),
            FlexValue::Text(s) => s,
        }
    }

    /// Integer view: numbers as-is, strings only when they parse cleanly.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FlexValue::Int(n) => Some(*n),
            FlexValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Text,
    Image,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "TEXT",
            MessageType::Image => "IMAGE",
            MessageType::System => "SYSTEM",
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEXT" => Ok(MessageType::Text),
            "IMAGE" => Ok(MessageType::Image),
            "SYSTEM" => Ok(MessageType::System),
            other => Err(format!("unknown message type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub is_group: bool,
    pub name: Option<String>,
    pub trip_id: Option<i64>,
    pub admin_id: Option<String>,
    pub last_message_content: Option<String>,
    pub last_message_sender_id: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    /// Timestamp used for inbox ordering: last message, else creation time.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }

    pub fn is_admin(&self, user_key: &str) -> bool {
        self.admin_id.as_deref() == Some(user_key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of a chat's most recent message as shown in an inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub message: Option<String>,
    pub send_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LastMessage {
    pub fn of(chat: &Chat) -> Self {
        Self {
            message: chat.last_message_content.clone(),
            send_by: chat.last_message_sender_id.clone(),
            created_at: chat.last_activity(),
        }
    }
}

/// One row of the merged inbox. Direct chats carry `peer_id`; group chats
/// carry their metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxEntry {
    pub chat_id: ChatId,
    pub is_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_message: LastMessage,
}

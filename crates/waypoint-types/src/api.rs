use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{Chat, ChatId, MessageId, Participant, UserKey};

// -- Errors --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

// -- Group chats --

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupChatRequest {
    pub name: Option<String>,
    pub trip_id: Option<i64>,
    pub admin_id: Option<UserKey>,
    pub participant_ids: Option<Vec<UserKey>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateGroupChatRequest {
    pub name: Option<String>,
    /// `None` leaves the trip alone, `Some(None)` unbinds it.
    #[serde(default, deserialize_with = "present")]
    pub trip_id: Option<Option<i64>>,
    pub admin_id: Option<UserKey>,
}

/// Distinguishes an explicit `null` from a missing field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl UpdateGroupChatRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.trip_id.is_none() && self.admin_id.is_none()
    }
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub chat: Chat,
}

#[derive(Debug, Serialize)]
pub struct ChatDetailResponse {
    pub chat: Chat,
    pub participants: Vec<Participant>,
}

// -- Participants --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddParticipantRequest {
    pub user_id: UserKey,
}

#[derive(Debug, Serialize)]
pub struct ParticipantAdded {
    pub chat_id: ChatId,
    pub user_id: String,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateMessageRequest {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct MessageEdited {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub content: String,
}

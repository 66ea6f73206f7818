//! Row mappers. Every query that returns chats or messages selects the
//! column lists below so the mappers can read by position.

use rusqlite::Row;
use rusqlite::types::Type;

use waypoint_types::models::{Chat, Message, MessageType, Participant};

/// Chat columns; queries alias `chats` as `c`.
pub const CHAT_COLUMNS: &str = "c.id, c.is_group, c.name, c.trip_id, c.admin_id, \
     c.last_message_content, c.last_message_sender_id, c.last_message_at, c.created_at";

/// Message columns; queries alias `messages` as `m`.
pub const MESSAGE_COLUMNS: &str =
    "m.id, m.chat_id, m.sender_id, m.content, m.type, m.is_read, m.created_at";

pub fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: row.get(0)?,
        is_group: row.get(1)?,
        name: row.get(2)?,
        trip_id: row.get(3)?,
        admin_id: row.get(4)?,
        last_message_content: row.get(5)?,
        last_message_sender_id: row.get(6)?,
        last_message_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

pub fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let kind: String = row.get(4)?;
    let kind = kind
        .parse::<MessageType>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?;

    Ok(Message {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        kind,
        is_read: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        user_id: row.get(0)?,
        joined_at: row.get(1)?,
    })
}

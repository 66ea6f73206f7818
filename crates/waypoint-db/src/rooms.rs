//! Room naming and lazy direct-chat creation.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use tracing::debug;

use waypoint_types::models::{Chat, ChatId};

use crate::chats::query_chat;
use crate::models::CHAT_COLUMNS;
use crate::{ChatError, Database, Result};

const DIRECT_SEPARATOR: char = '_';

/// Orders a pair so both sides compute the same key without coordination.
pub fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Order-independent key of the room shared by two users.
pub fn canonical_direct_room_id(a: &str, b: &str) -> String {
    let (low, high) = ordered_pair(a, b);
    format!("{}{}{}", low, DIRECT_SEPARATOR, high)
}

pub fn group_room_id(chat_id: ChatId) -> String {
    format!("group:{}", chat_id)
}

fn validate_pair(a: &str, b: &str) -> Result<()> {
    if a.trim().is_empty() || b.trim().is_empty() || a == b {
        return Err(ChatError::InvalidPair);
    }
    Ok(())
}

impl Database {
    pub fn find_direct_chat(&self, a: &str, b: &str) -> Result<Option<Chat>> {
        validate_pair(a, b)?;
        let (low, high) = ordered_pair(a, b);
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CHAT_COLUMNS} FROM chats c
                 WHERE c.is_group = 0 AND c.direct_low = ?1 AND c.direct_high = ?2"
            );
            let chat = conn
                .query_row(&sql, params![low, high], crate::models::chat_from_row)
                .optional()?;
            Ok(chat)
        })
    }

    /// Returns the direct chat for the unordered pair {a, b}, creating the
    /// chat and both participant rows on first contact. Safe to retry: every
    /// insert is conflict-ignoring and the pair key is unique.
    pub fn get_or_create_direct_chat(&self, a: &str, b: &str) -> Result<Chat> {
        validate_pair(a, b)?;
        let (low, high) = ordered_pair(a, b);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();

            let created = tx.execute(
                "INSERT OR IGNORE INTO chats (is_group, direct_low, direct_high, created_at)
                 VALUES (0, ?1, ?2, ?3)",
                params![low, high, now],
            )?;

            let chat_id: ChatId = tx.query_row(
                "SELECT id FROM chats WHERE is_group = 0 AND direct_low = ?1 AND direct_high = ?2",
                params![low, high],
                |r| r.get(0),
            )?;

            for user in [low, high] {
                tx.execute(
                    "INSERT OR IGNORE INTO chat_participants (chat_id, user_id, joined_at)
                     VALUES (?1, ?2, ?3)",
                    params![chat_id, user, now],
                )?;
            }

            let chat = query_chat(&tx, chat_id)?
                .ok_or_else(|| ChatError::Internal(format!("direct chat {} vanished", chat_id)))?;
            tx.commit()?;

            if created > 0 {
                debug!("Created direct chat {} for {} / {}", chat_id, low, high);
            }
            Ok(chat)
        })
    }

    /// The other participant of a direct chat.
    pub fn direct_peer(&self, chat_id: ChatId, user_key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let peer = conn
                .query_row(
                    "SELECT user_id FROM chat_participants
                     WHERE chat_id = ?1 AND user_id <> ?2
                     ORDER BY user_id LIMIT 1",
                    params![chat_id, user_key],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(peer)
        })
    }
}

//! Participation and admin checks, plus participant management.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use tracing::info;

use waypoint_types::models::{Chat, ChatId, Message, MessageId, Participant};

use crate::chats::{query_chat, query_group_chat};
use crate::models::participant_from_row;
use crate::{ChatError, Database, Result};

fn caller_key(caller: Option<&str>) -> Result<&str> {
    match caller {
        Some(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(ChatError::Unauthenticated),
    }
}

impl Database {
    pub fn is_participant(&self, chat_id: ChatId, user_key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let hit: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2 LIMIT 1",
                    params![chat_id, user_key],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(hit.is_some())
        })
    }

    /// Resolves the caller and checks they take part in the chat.
    /// Returns the chat so callers do not load it twice.
    pub fn require_participant(&self, chat_id: ChatId, caller: Option<&str>) -> Result<(String, Chat)> {
        let user_key = caller_key(caller)?;
        let chat = self
            .get_chat(chat_id)?
            .ok_or_else(|| ChatError::not_found("chat not found"))?;
        if !self.is_participant(chat_id, user_key)? {
            return Err(ChatError::forbidden("you are not a participant of this chat"));
        }
        Ok((user_key.to_string(), chat))
    }

    /// Resolves the caller and checks they are the stored admin of a group chat.
    pub fn require_admin(&self, chat_id: ChatId, caller: Option<&str>) -> Result<(String, Chat)> {
        let user_key = caller_key(caller)?;
        let chat = self
            .get_group_chat(chat_id)?
            .ok_or_else(|| ChatError::not_found("chat not found"))?;
        if !chat.is_admin(user_key) {
            return Err(ChatError::forbidden("only the admin can do this"));
        }
        Ok((user_key.to_string(), chat))
    }

    /// Edit/delete guard: the author may always change their own message;
    /// anyone else needs to be the chat admin.
    pub fn require_author_or_admin(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        caller: Option<&str>,
    ) -> Result<(String, Message)> {
        let (user_key, chat) = self.require_participant(chat_id, caller)?;
        let message = self
            .get_message(chat_id, message_id)?
            .ok_or_else(|| ChatError::not_found("message not found"))?;

        if message.sender_id != user_key && !chat.is_admin(&user_key) {
            return Err(ChatError::forbidden("you cannot change this message"));
        }
        Ok((user_key, message))
    }

    pub fn list_participants(&self, chat_id: ChatId) -> Result<Vec<Participant>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, joined_at FROM chat_participants
                 WHERE chat_id = ?1
                 ORDER BY joined_at ASC, user_id ASC",
            )?;
            let rows = stmt
                .query_map([chat_id], participant_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn participant_ids(&self, chat_id: ChatId) -> Result<Vec<String>> {
        Ok(self
            .list_participants(chat_id)?
            .into_iter()
            .map(|p| p.user_id)
            .collect())
    }

    /// Adds a participant to a group chat; a duplicate is a conflict.
    pub fn add_participant(&self, chat_id: ChatId, user_key: &str) -> Result<()> {
        if user_key.trim().is_empty() {
            return Err(ChatError::validation("user_id must not be empty"));
        }
        self.with_conn(|conn| {
            if query_group_chat(conn, chat_id)?.is_none() {
                return Err(ChatError::not_found("chat not found"));
            }
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO chat_participants (chat_id, user_id, joined_at)
                 VALUES (?1, ?2, ?3)",
                params![chat_id, user_key, Utc::now()],
            )?;
            if inserted == 0 {
                return Err(ChatError::Conflict("user is already a participant".into()));
            }
            info!("{} added to chat {}", user_key, chat_id);
            Ok(())
        })
    }

    /// Removes a participant. The admin cannot be removed without a
    /// transfer first.
    pub fn remove_participant(&self, chat_id: ChatId, user_key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let chat = query_chat(conn, chat_id)?.ok_or_else(|| ChatError::not_found("chat not found"))?;
            if chat.is_admin(user_key) {
                return Err(ChatError::forbidden(
                    "the admin cannot be removed (transfer admin or delete the chat)",
                ));
            }
            let removed = conn.execute(
                "DELETE FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id, user_key],
            )?;
            Ok(removed > 0)
        })
    }

    /// Self-service join of a group chat.
    pub fn join_group(&self, chat_id: ChatId, caller: Option<&str>) -> Result<String> {
        let user_key = caller_key(caller)?;
        match self.add_participant(chat_id, user_key) {
            Err(ChatError::Conflict(_)) => Err(ChatError::Conflict("you are already a participant".into())),
            other => other.map(|_| user_key.to_string()),
        }
    }

    /// Self-service leave. The admin must transfer or delete first.
    pub fn leave_group(&self, chat_id: ChatId, caller: Option<&str>) -> Result<()> {
        let user_key = caller_key(caller)?;
        let chat = self
            .get_group_chat(chat_id)?
            .ok_or_else(|| ChatError::not_found("chat not found"))?;
        if chat.is_admin(user_key) {
            return Err(ChatError::forbidden(
                "the admin cannot leave the chat (transfer admin or delete the chat)",
            ));
        }
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id, user_key],
            )?;
            Ok(())
        })
    }
}

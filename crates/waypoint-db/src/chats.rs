use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use waypoint_types::api::{CreateGroupChatRequest, UpdateGroupChatRequest};
use waypoint_types::models::{Chat, ChatId};

use crate::models::{CHAT_COLUMNS, chat_from_row};
use crate::{ChatError, Database, Result};

pub(crate) fn query_chat(conn: &Connection, chat_id: ChatId) -> Result<Option<Chat>> {
    let sql = format!("SELECT {CHAT_COLUMNS} FROM chats c WHERE c.id = ?1");
    Ok(conn.query_row(&sql, [chat_id], chat_from_row).optional()?)
}

pub(crate) fn query_group_chat(conn: &Connection, chat_id: ChatId) -> Result<Option<Chat>> {
    let sql = format!("SELECT {CHAT_COLUMNS} FROM chats c WHERE c.id = ?1 AND c.is_group = 1");
    Ok(conn.query_row(&sql, [chat_id], chat_from_row).optional()?)
}

fn non_empty_name(name: Option<&str>) -> Result<()> {
    match name {
        Some(n) if n.trim().is_empty() => Err(ChatError::validation("name must not be empty")),
        _ => Ok(()),
    }
}

impl Database {
    pub fn get_chat(&self, chat_id: ChatId) -> Result<Option<Chat>> {
        self.with_conn(|conn| query_chat(conn, chat_id))
    }

    pub fn get_group_chat(&self, chat_id: ChatId) -> Result<Option<Chat>> {
        self.with_conn(|conn| query_group_chat(conn, chat_id))
    }

    pub fn get_group_chat_by_trip(&self, trip_id: i64) -> Result<Option<Chat>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CHAT_COLUMNS} FROM chats c
                 WHERE c.is_group = 1 AND c.trip_id = ?1
                 ORDER BY c.id LIMIT 1"
            );
            Ok(conn.query_row(&sql, [trip_id], chat_from_row).optional()?)
        })
    }

    /// Creates a group chat. The admin defaults to the creator and is always
    /// inserted as a participant, listed or not.
    pub fn create_group_chat(&self, req: &CreateGroupChatRequest, creator: &str) -> Result<Chat> {
        non_empty_name(req.name.as_deref())?;

        let admin = req
            .admin_id
            .as_ref()
            .map(|k| k.as_str())
            .unwrap_or(creator)
            .to_string();
        if admin.trim().is_empty() {
            return Err(ChatError::validation("admin_id is required"));
        }

        let mut members: BTreeSet<&str> = BTreeSet::new();
        members.insert(admin.as_str());
        for key in req.participant_ids.iter().flatten() {
            if !key.as_str().trim().is_empty() {
                members.insert(key.as_str());
            }
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();

            tx.execute(
                "INSERT INTO chats (is_group, name, trip_id, admin_id, created_at)
                 VALUES (1, ?1, ?2, ?3, ?4)",
                params![req.name, req.trip_id, admin, now],
            )?;
            let chat_id = tx.last_insert_rowid();

            for user in &members {
                tx.execute(
                    "INSERT OR IGNORE INTO chat_participants (chat_id, user_id, joined_at)
                     VALUES (?1, ?2, ?3)",
                    params![chat_id, user, now],
                )?;
            }

            let chat = query_chat(&tx, chat_id)?
                .ok_or_else(|| ChatError::Internal(format!("group chat {} vanished", chat_id)))?;
            tx.commit()?;

            info!("Group chat {} created by {} ({} participants)", chat_id, creator, members.len());
            Ok(chat)
        })
    }

    /// Partial update of a group chat. A newly assigned admin is also made a
    /// participant.
    pub fn update_group_chat(&self, chat_id: ChatId, req: &UpdateGroupChatRequest) -> Result<Chat> {
        if req.is_empty() {
            return Err(ChatError::validation("no fields to update"));
        }
        non_empty_name(req.name.as_deref())?;
        let admin = req.admin_id.as_ref().map(|k| k.as_str());
        if admin.is_some_and(|a| a.trim().is_empty()) {
            return Err(ChatError::validation("admin_id must not be empty"));
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let changed = tx.execute(
                "UPDATE chats
                 SET name = COALESCE(?1, name),
                     trip_id = CASE WHEN ?2 THEN ?3 ELSE trip_id END,
                     admin_id = COALESCE(?4, admin_id)
                 WHERE id = ?5 AND is_group = 1",
                params![req.name, req.trip_id.is_some(), req.trip_id.flatten(), admin, chat_id],
            )?;
            if changed == 0 {
                return Err(ChatError::not_found("chat not found"));
            }

            if let Some(admin) = admin {
                tx.execute(
                    "INSERT OR IGNORE INTO chat_participants (chat_id, user_id, joined_at)
                     VALUES (?1, ?2, ?3)",
                    params![chat_id, admin, Utc::now()],
                )?;
            }

            let chat = query_chat(&tx, chat_id)?.ok_or_else(|| ChatError::not_found("chat not found"))?;
            tx.commit()?;
            Ok(chat)
        })
    }

    /// Deletes a group chat; participants and messages go with it.
    pub fn delete_group_chat(&self, chat_id: ChatId) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM chats WHERE id = ?1 AND is_group = 1", [chat_id])?;
            Ok(deleted > 0)
        })
    }

    // -- Users --

    /// Caches the display name reported by the identity service.
    pub fn remember_user(&self, user_key: &str, display_name: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, display_name, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     display_name = COALESCE(excluded.display_name, users.display_name),
                     updated_at = excluded.updated_at",
                params![user_key, display_name, Utc::now()],
            )?;
            Ok(())
        })
    }

    pub fn display_name(&self, user_key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let name: Option<Option<String>> = conn
                .query_row("SELECT display_name FROM users WHERE id = ?1", [user_key], |r| r.get(0))
                .optional()?;
            Ok(name.flatten())
        })
    }
}

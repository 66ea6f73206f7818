//! Per-user chat listings, ordered by recency.

use std::cmp::Reverse;

use rusqlite::{Connection, params};

use waypoint_types::models::{Chat, InboxEntry, LastMessage};

use crate::models::{CHAT_COLUMNS, chat_from_row};
use crate::{Database, Result};

fn direct_entries(conn: &Connection, user_key: &str) -> Result<Vec<InboxEntry>> {
    let sql = format!(
        "SELECT {CHAT_COLUMNS}, peer.user_id
         FROM chats c
         JOIN chat_participants me ON me.chat_id = c.id AND me.user_id = ?1
         JOIN chat_participants peer ON peer.chat_id = c.id AND peer.user_id <> ?1
         WHERE c.is_group = 0"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_key], |row| {
            let chat = chat_from_row(row)?;
            let peer: String = row.get(9)?;
            Ok(InboxEntry {
                chat_id: chat.id,
                is_group: false,
                peer_id: Some(peer),
                name: None,
                trip_id: None,
                admin_id: None,
                created_at: chat.created_at,
                last_message: LastMessage::of(&chat),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn group_chats(conn: &Connection, user_key: &str) -> Result<Vec<Chat>> {
    let sql = format!(
        "SELECT {CHAT_COLUMNS}
         FROM chats c
         JOIN chat_participants cp ON cp.chat_id = c.id AND cp.user_id = ?1
         WHERE c.is_group = 1
         ORDER BY COALESCE(c.last_message_at, c.created_at) DESC, c.id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![user_key], chat_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn group_entry(chat: Chat) -> InboxEntry {
    InboxEntry {
        chat_id: chat.id,
        is_group: true,
        peer_id: None,
        last_message: LastMessage::of(&chat),
        name: chat.name,
        trip_id: chat.trip_id,
        admin_id: chat.admin_id,
        created_at: chat.created_at,
    }
}

impl Database {
    /// Direct and group chats of a user merged into one list, most recent
    /// activity first.
    pub fn list_for_user(&self, user_key: &str) -> Result<Vec<InboxEntry>> {
        self.with_conn(|conn| {
            let mut entries = direct_entries(conn, user_key)?;
            entries.extend(group_chats(conn, user_key)?.into_iter().map(group_entry));
            entries.sort_by_key(|e| (Reverse(e.last_message.created_at), Reverse(e.chat_id)));
            Ok(entries)
        })
    }

    pub fn list_groups_for_user(&self, user_key: &str) -> Result<Vec<Chat>> {
        self.with_conn(|conn| group_chats(conn, user_key))
    }
}

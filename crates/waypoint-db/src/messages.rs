//! Append-only message log per chat, with the denormalized last-message
//! cursor on the chat row.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use waypoint_types::models::{ChatId, Message, MessageId, MessageType};

use crate::models::{MESSAGE_COLUMNS, message_from_row};
use crate::{ChatError, Database, Result};

fn latest_message_id(conn: &Connection, chat_id: ChatId) -> Result<Option<MessageId>> {
    Ok(conn
        .query_row(
            "SELECT id FROM messages WHERE chat_id = ?1 ORDER BY id DESC LIMIT 1",
            [chat_id],
            |r| r.get(0),
        )
        .optional()?)
}

fn query_messages(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Re-reads only the newest remaining row and rewrites the cursor from it,
/// or clears the cursor when the chat is empty.
fn recompute_cursor(conn: &Connection, chat_id: ChatId) -> Result<()> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.chat_id = ?1 ORDER BY m.id DESC LIMIT 1"
    );
    let latest = conn.query_row(&sql, [chat_id], message_from_row).optional()?;

    match latest {
        Some(m) => conn.execute(
            "UPDATE chats SET last_message_content = ?1, last_message_sender_id = ?2, last_message_at = ?3
             WHERE id = ?4",
            params![m.content, m.sender_id, m.created_at, chat_id],
        )?,
        None => conn.execute(
            "UPDATE chats SET last_message_content = NULL, last_message_sender_id = NULL, last_message_at = NULL
             WHERE id = ?1",
            [chat_id],
        )?,
    };
    Ok(())
}

impl Database {
    /// Persists a message and moves the chat's last-message cursor to it.
    /// The returned id is the client-visible offset.
    pub fn append_message(
        &self,
        chat_id: ChatId,
        sender_id: &str,
        content: &str,
        kind: MessageType,
    ) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();

            tx.execute(
                "INSERT INTO messages (chat_id, sender_id, content, type, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                params![chat_id, sender_id, content, kind.as_str(), now],
            )?;
            let id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE chats SET last_message_content = ?1, last_message_sender_id = ?2, last_message_at = ?3
                 WHERE id = ?4",
                params![content, sender_id, now, chat_id],
            )?;
            tx.commit()?;

            debug!("Message {} appended to chat {} by {}", id, chat_id, sender_id);
            Ok(Message {
                id,
                chat_id,
                sender_id: sender_id.to_string(),
                content: content.to_string(),
                kind,
                is_read: false,
                created_at: now,
            })
        })
    }

    pub fn get_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1 AND m.chat_id = ?2");
            Ok(conn
                .query_row(&sql, params![message_id, chat_id], message_from_row)
                .optional()?)
        })
    }

    /// Catch-up after reconnection: every message with `id > after_id`,
    /// ascending. `None` means no limit.
    pub fn list_since(&self, chat_id: ChatId, after_id: MessageId, limit: Option<u32>) -> Result<Vec<Message>> {
        let limit = limit.map(i64::from).unwrap_or(-1);
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE m.chat_id = ?1 AND m.id > ?2
                 ORDER BY m.id ASC
                 LIMIT ?3"
            );
            query_messages(conn, &sql, params![chat_id, after_id, limit])
        })
    }

    /// The newest `limit` messages in chronological order.
    pub fn list_latest(&self, chat_id: ChatId, limit: u32) -> Result<Vec<Message>> {
        self.list_before(chat_id, None, limit)
    }

    /// Page of at most `limit` messages older than `before_id` (or the newest
    /// page when absent), returned ascending.
    pub fn list_before(&self, chat_id: ChatId, before_id: Option<MessageId>, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE m.chat_id = ?1 AND (?2 IS NULL OR m.id < ?2)
                 ORDER BY m.id DESC
                 LIMIT ?3"
            );
            let mut rows = query_messages(conn, &sql, params![chat_id, before_id, limit])?;
            rows.reverse();
            Ok(rows)
        })
    }

    /// Flags every message from someone other than `reader` as read.
    /// Returns how many rows flipped; zero when already read.
    pub fn mark_read_up_to(&self, chat_id: ChatId, reader: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE chat_id = ?1 AND sender_id <> ?2 AND is_read = 0",
                params![chat_id, reader],
            )?;
            Ok(changed)
        })
    }

    /// Rewrites a message's content. When it is the chat's newest message the
    /// cursor content is rewritten too.
    pub fn edit_message(&self, chat_id: ChatId, message_id: MessageId, content: &str) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(ChatError::validation("content must not be empty"));
        }
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let changed = tx.execute(
                "UPDATE messages SET content = ?1 WHERE id = ?2 AND chat_id = ?3",
                params![content, message_id, chat_id],
            )?;
            if changed == 0 {
                return Err(ChatError::not_found("message not found"));
            }

            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1");
            let message = tx.query_row(&sql, [message_id], message_from_row)?;

            if latest_message_id(&tx, chat_id)? == Some(message_id) {
                tx.execute(
                    "UPDATE chats SET last_message_content = ?1, last_message_sender_id = ?2 WHERE id = ?3",
                    params![message.content, message.sender_id, chat_id],
                )?;
            }
            tx.commit()?;
            Ok(message)
        })
    }

    /// Deletes a message, recomputing the cursor when it was the newest one.
    pub fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let latest_before = latest_message_id(&tx, chat_id)?;
            let deleted = tx.execute(
                "DELETE FROM messages WHERE id = ?1 AND chat_id = ?2",
                params![message_id, chat_id],
            )?;
            if deleted == 0 {
                return Err(ChatError::not_found("message not found"));
            }

            if latest_before == Some(message_id) {
                recompute_cursor(&tx, chat_id)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Newest unread message from others in each of the user's chats, most
    /// recent first. This is the on-connect digest, not full history.
    pub fn pending_digest(&self, user_key: &str, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 JOIN (
                     SELECT m2.chat_id, MAX(m2.id) AS max_id
                     FROM messages m2
                     JOIN chat_participants cp ON cp.chat_id = m2.chat_id AND cp.user_id = ?1
                     WHERE m2.is_read = 0 AND m2.sender_id <> ?1
                     GROUP BY m2.chat_id
                 ) t ON m.id = t.max_id
                 ORDER BY m.id DESC
                 LIMIT ?2"
            );
            query_messages(conn, &sql, params![user_key, limit])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_messages(n: usize) -> (Database, ChatId, Vec<MessageId>) {
        let db = Database::open_in_memory().unwrap();
        let chat = db.get_or_create_direct_chat("A", "B").unwrap();
        let ids = (0..n)
            .map(|i| {
                let sender = if i % 2 == 0 { "A" } else { "B" };
                db.append_message(chat.id, sender, &format!("m{}", i), MessageType::Text)
                    .unwrap()
                    .id
            })
            .collect();
        (db, chat.id, ids)
    }

    #[test]
    fn test_ids_are_strictly_increasing() {
        let (_db, _chat, ids) = with_messages(5);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_list_latest_returns_newest_page_ascending() {
        let (db, chat_id, ids) = with_messages(8);
        let page = db.list_latest(chat_id, 3).unwrap();
        let got: Vec<_> = page.iter().map(|m| m.id).collect();
        assert_eq!(got, ids[5..].to_vec());
        assert_eq!(page.last().unwrap().content, "m7");
    }

    #[test]
    fn test_list_since_is_strictly_after_offset() {
        let (db, chat_id, ids) = with_messages(6);
        let got: Vec<_> = db
            .list_since(chat_id, ids[2], None)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(got, ids[3..].to_vec());

        let capped = db.list_since(chat_id, 0, Some(2)).unwrap();
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].id, ids[0]);
    }

    #[test]
    fn test_list_before_pages_backwards() {
        let (db, chat_id, ids) = with_messages(10);
        let page = db.list_before(chat_id, Some(ids[6]), 5).unwrap();
        let got: Vec<_> = page.iter().map(|m| m.id).collect();
        assert_eq!(got, ids[1..6].to_vec());
    }

    #[test]
    fn test_append_moves_cursor() {
        let (db, chat_id, _) = with_messages(3);
        let chat = db.get_chat(chat_id).unwrap().unwrap();
        assert_eq!(chat.last_message_content.as_deref(), Some("m2"));
        assert_eq!(chat.last_message_sender_id.as_deref(), Some("A"));
        assert!(chat.last_message_at.is_some());
    }

    #[test]
    fn test_mark_read_skips_own_messages_and_is_idempotent() {
        let (db, chat_id, _) = with_messages(4);
        assert_eq!(db.mark_read_up_to(chat_id, "B").unwrap(), 2);
        assert_eq!(db.mark_read_up_to(chat_id, "B").unwrap(), 0);

        let msgs = db.list_latest(chat_id, 10).unwrap();
        for m in msgs {
            assert_eq!(m.is_read, m.sender_id == "A");
        }
    }

    #[test]
    fn test_edit_latest_rewrites_cursor() {
        let (db, chat_id, ids) = with_messages(3);

        db.edit_message(chat_id, ids[0], "older edit").unwrap();
        let chat = db.get_chat(chat_id).unwrap().unwrap();
        assert_eq!(chat.last_message_content.as_deref(), Some("m2"));

        let edited = db.edit_message(chat_id, ids[2], "newest edit").unwrap();
        assert_eq!(edited.content, "newest edit");
        let chat = db.get_chat(chat_id).unwrap().unwrap();
        assert_eq!(chat.last_message_content.as_deref(), Some("newest edit"));
    }

    #[test]
    fn test_edit_in_other_chat_is_not_found() {
        let (db, _chat_id, ids) = with_messages(1);
        let other = db.get_or_create_direct_chat("A", "C").unwrap();
        assert!(matches!(db.edit_message(other.id, ids[0], "x"), Err(ChatError::NotFound(_))));
    }

    #[test]
    fn test_delete_latest_recomputes_cursor() {
        let (db, chat_id, ids) = with_messages(3);

        db.delete_message(chat_id, ids[2]).unwrap();
        let chat = db.get_chat(chat_id).unwrap().unwrap();
        assert_eq!(chat.last_message_content.as_deref(), Some("m1"));
        assert_eq!(chat.last_message_sender_id.as_deref(), Some("B"));

        db.delete_message(chat_id, ids[0]).unwrap();
        let chat = db.get_chat(chat_id).unwrap().unwrap();
        assert_eq!(chat.last_message_content.as_deref(), Some("m1"));

        db.delete_message(chat_id, ids[1]).unwrap();
        let chat = db.get_chat(chat_id).unwrap().unwrap();
        assert!(chat.last_message_content.is_none());
        assert!(chat.last_message_sender_id.is_none());
        assert!(chat.last_message_at.is_none());

        assert!(matches!(db.delete_message(chat_id, ids[1]), Err(ChatError::NotFound(_))));
    }

    #[test]
    fn test_offsets_are_not_reused_after_delete() {
        let (db, chat_id, ids) = with_messages(2);
        db.delete_message(chat_id, ids[1]).unwrap();
        let next = db.append_message(chat_id, "A", "again", MessageType::Text).unwrap();
        assert!(next.id > ids[1]);
    }

    #[test]
    fn test_pending_digest_one_per_chat() {
        let db = Database::open_in_memory().unwrap();
        let ab = db.get_or_create_direct_chat("A", "B").unwrap();
        let ac = db.get_or_create_direct_chat("A", "C").unwrap();
        let ad = db.get_or_create_direct_chat("A", "D").unwrap();

        db.append_message(ab.id, "B", "b1", MessageType::Text).unwrap();
        let b2 = db.append_message(ab.id, "B", "b2", MessageType::Text).unwrap();
        let c1 = db.append_message(ac.id, "C", "c1", MessageType::Text).unwrap();
        db.append_message(ad.id, "A", "mine", MessageType::Text).unwrap();

        let digest = db.pending_digest("A", 20).unwrap();
        let got: Vec<_> = digest.iter().map(|m| m.id).collect();
        assert_eq!(got, vec![c1.id, b2.id]);

        db.mark_read_up_to(ab.id, "A").unwrap();
        let digest = db.pending_digest("A", 20).unwrap();
        assert_eq!(digest.len(), 1);
        assert_eq!(db.pending_digest("A", 0).unwrap().len(), 0);
    }
}

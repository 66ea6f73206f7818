use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Versioned schema setup. Runs once at startup, never on a request path.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (chats, participants, messages)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                display_name    TEXT,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE chats (
                id                      INTEGER PRIMARY KEY AUTOINCREMENT,
                is_group                INTEGER NOT NULL DEFAULT 0,
                name                    TEXT,
                trip_id                 INTEGER,
                admin_id                TEXT,
                direct_low              TEXT,
                direct_high             TEXT,
                last_message_content    TEXT,
                last_message_sender_id  TEXT,
                last_message_at         TEXT,
                created_at              TEXT NOT NULL,
                UNIQUE (direct_low, direct_high)
            );

            CREATE TABLE chat_participants (
                chat_id     INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL,
                joined_at   TEXT NOT NULL,
                PRIMARY KEY (chat_id, user_id)
            );

            CREATE TABLE messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id     INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                sender_id   TEXT NOT NULL,
                content     TEXT NOT NULL,
                type        TEXT NOT NULL DEFAULT 'TEXT',
                is_read     INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_messages_chat ON messages(chat_id, id);
            CREATE INDEX idx_messages_unread ON messages(chat_id, is_read, id);
            CREATE INDEX idx_participants_user ON chat_participants(user_id, chat_id);
            CREATE INDEX idx_chats_inbox ON chats(is_group, last_message_at, created_at);
            CREATE INDEX idx_chats_trip ON chats(trip_id);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}

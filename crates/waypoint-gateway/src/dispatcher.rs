use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use waypoint_db::rooms::{canonical_direct_room_id, group_room_id, ordered_pair};
use waypoint_types::events::ServerEvent;
use waypoint_types::models::ChatId;

/// A multicast channel that connections can join.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// The room shared by two users of a direct chat.
    Direct { low: String, high: String },
    Group(ChatId),
    /// Every live connection of one user.
    Personal(String),
}

impl Room {
    pub fn direct(a: &str, b: &str) -> Self {
        let (low, high) = ordered_pair(a, b);
        Room::Direct {
            low: low.to_string(),
            high: high.to_string(),
        }
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Direct { low, high } => f.write_str(&canonical_direct_room_id(low, high)),
            Room::Group(id) => f.write_str(&group_room_id(*id)),
            Room::Personal(user) => write!(f, "user:{}", user),
        }
    }
}

struct ConnectionEntry {
    tx: mpsc::UnboundedSender<ServerEvent>,
    user_key: Option<String>,
    rooms: HashSet<Room>,
}

/// Registry of live connections and the rooms they joined.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// conn_id -> connection state
    connections: RwLock<HashMap<Uuid, ConnectionEntry>>,

    /// room -> conn_ids. Personal rooms make this the user -> connections index.
    rooms: RwLock<HashMap<Room, HashSet<Uuid>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new, unidentified connection. Returns (conn_id, receiver).
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(
            conn_id,
            ConnectionEntry {
                tx,
                user_key: None,
                rooms: HashSet::new(),
            },
        );
        (conn_id, rx)
    }

    /// Drops the connection from every room it joined.
    pub async fn unregister(&self, conn_id: Uuid) {
        let mut connections = self.inner.connections.write().await;
        let Some(entry) = connections.remove(&conn_id) else {
            return;
        };

        let mut rooms = self.inner.rooms.write().await;
        for room in entry.rooms {
            if let Some(members) = rooms.get_mut(&room) {
                members.remove(&conn_id);
                if members.is_empty() {
                    rooms.remove(&room);
                }
            }
        }
    }

    pub async fn identity(&self, conn_id: Uuid) -> Option<String> {
        self.inner
            .connections
            .read()
            .await
            .get(&conn_id)
            .and_then(|c| c.user_key.clone())
    }

    /// Binds a user key to the connection and joins its personal room.
    /// Returns false when the connection is gone or already bound to a
    /// different user.
    pub async fn identify(&self, conn_id: Uuid, user_key: &str) -> bool {
        let mut connections = self.inner.connections.write().await;
        let Some(entry) = connections.get_mut(&conn_id) else {
            return false;
        };
        match entry.user_key.as_deref() {
            Some(current) if current != user_key => return false,
            Some(_) => return true,
            None => entry.user_key = Some(user_key.to_string()),
        }

        let room = Room::Personal(user_key.to_string());
        entry.rooms.insert(room.clone());
        self.inner
            .rooms
            .write()
            .await
            .entry(room)
            .or_default()
            .insert(conn_id);
        true
    }

    pub async fn join_room(&self, conn_id: Uuid, room: Room) {
        let mut connections = self.inner.connections.write().await;
        let Some(entry) = connections.get_mut(&conn_id) else {
            return;
        };
        if !entry.rooms.insert(room.clone()) {
            return;
        }
        debug!("Connection {} joined room {}", conn_id, room);
        self.inner
            .rooms
            .write()
            .await
            .entry(room)
            .or_default()
            .insert(conn_id);
    }

    pub async fn rooms_of(&self, conn_id: Uuid) -> HashSet<Room> {
        self.inner
            .connections
            .read()
            .await
            .get(&conn_id)
            .map(|c| c.rooms.clone())
            .unwrap_or_default()
    }

    /// Send an event to one connection.
    pub async fn emit_to_conn(&self, conn_id: Uuid, event: ServerEvent) {
        if let Some(entry) = self.inner.connections.read().await.get(&conn_id) {
            let _ = entry.tx.send(event);
        }
    }

    /// Send an event to every live connection of a user.
    pub async fn emit_to_user(&self, user_key: &str, event: ServerEvent) {
        self.emit_to_rooms(&[Room::Personal(user_key.to_string())], event, None)
            .await;
    }

    /// Send one copy of an event to every connection in any of `rooms`,
    /// skipping `except`. Returns how many connections were reached.
    pub async fn emit_to_rooms(&self, rooms: &[Room], event: ServerEvent, except: Option<Uuid>) -> usize {
        let connections = self.inner.connections.read().await;
        let members = self.inner.rooms.read().await;

        let targets: HashSet<Uuid> = rooms
            .iter()
            .filter_map(|room| members.get(room))
            .flatten()
            .copied()
            .filter(|id| Some(*id) != except)
            .collect();

        let mut reached = 0;
        for conn_id in targets {
            if let Some(entry) = connections.get(&conn_id) {
                if entry.tx.send(event.clone()).is_ok() {
                    reached += 1;
                }
            }
        }
        reached
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }
}

//! Per-connection realtime behaviour: identification, room joins with
//! history replay, and message send with fan-out.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use waypoint_db::{ChatError, Database, Result};
use waypoint_types::events::{
    AckPayload, AckStatus, ChatMessagePayload, ClientCommand, ClientFrame, DecodeError, JoinRequest,
    NotificationPayload, RoomDescriptor, SendRequest, SendTarget, ServerEvent,
};
use waypoint_types::models::{Chat, ChatId, Identity, Message, MessageId, MessageType};

use crate::dispatcher::{Dispatcher, Room};

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Messages replayed on join when the client has no offset.
    pub history_page: u32,
    /// Upper bound on the on-connect pending digest.
    pub pending_digest: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            history_page: 50,
            pending_digest: 20,
        }
    }
}

/// Handshake state that lives as long as the connection.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub conn_id: Uuid,
    /// Default replay offset for peer-addressed joins.
    pub handshake_offset: Option<i64>,
}

#[derive(Clone)]
pub struct DeliveryEngine {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    settings: EngineSettings,
}

/// Which event acknowledges a join.
#[derive(Clone, Copy)]
enum JoinKind {
    Chat,
    Group,
}

/// Room and `send_to` value for messages of a chat, seen from `sender`.
pub fn address(chat: &Chat, sender: &str, participants: &[String]) -> Result<(Room, String)> {
    if chat.is_group {
        return Ok((Room::Group(chat.id), chat.id.to_string()));
    }
    let peer = participants
        .iter()
        .find(|p| p.as_str() != sender)
        .ok_or_else(|| ChatError::Internal(format!("direct chat {} has no peer for {}", chat.id, sender)))?;
    Ok((Room::direct(sender, peer), peer.clone()))
}

fn message_payload(message: &Message, send_to: String) -> ChatMessagePayload {
    ChatMessagePayload {
        message: message.content.clone(),
        server_offset: message.id,
        send_to,
        send_by: message.sender_id.clone(),
        created_at: message.created_at,
        chat_id: message.chat_id,
    }
}

/// Chat a send goes to. A numeric peer reference naming a chat the sender is
/// already in targets that chat; anything else is a direct peer.
fn resolve_target(db: &Database, sender: &str, target: SendTarget) -> Result<Chat> {
    match target {
        SendTarget::Chat(chat_id) => db.require_participant(chat_id, Some(sender)).map(|(_, chat)| chat),
        SendTarget::Peer(peer) => {
            if let Ok(chat_id) = peer.trim().parse::<ChatId>() {
                if let Some(chat) = db.get_chat(chat_id)? {
                    if db.is_participant(chat_id, sender)? {
                        return Ok(chat);
                    }
                }
            }
            db.get_or_create_direct_chat(sender, &peer)
        }
    }
}

impl DeliveryEngine {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, settings: EngineSettings) -> Self {
        Self {
            db,
            dispatcher,
            settings,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Connection accepted. Identified connections join their personal room
    /// and get the pending digest; anonymous ones wait for `setUserId`.
    pub async fn on_connect(&self, conn_id: Uuid, identity: Option<Identity>) {
        let Some(identity) = identity else {
            info!("Connection {} opened without identity", conn_id);
            return;
        };
        if let Err(e) = self.identify(conn_id, identity).await {
            self.reject(conn_id, None, e).await;
        }
    }

    /// Decodes and runs one client frame. Every failure is answered with a
    /// `chat_error` event and, when requested, an error ack.
    pub async fn handle_frame(&self, session: &Session, frame: ClientFrame) {
        let conn_id = session.conn_id;
        let ack = frame.ack;

        let command = match ClientCommand::decode(&frame.event, frame.data) {
            Ok(command) => command,
            Err(DecodeError::UnknownEvent(event)) => {
                warn!("Connection {} sent unknown event {}", conn_id, event);
                if let Some(ack) = ack {
                    self.send_ack(conn_id, ack, Err(format!("unknown event: {}", event)))
                        .await;
                }
                return;
            }
            Err(e) => {
                self.reject(conn_id, ack, ChatError::validation(e.to_string())).await;
                return;
            }
        };

        let outcome = match command {
            ClientCommand::SetUserId { user_key } => self.set_user_id(conn_id, user_key).await.map(|_| None),
            ClientCommand::JoinChat(req) => self.join(session, req).await.map(|_| None),
            ClientCommand::JoinGroup { chat_id, offset } => self
                .join_chat_id(conn_id, chat_id, offset, JoinKind::Group)
                .await
                .map(|_| None),
            ClientCommand::ChatMessage(req) => self.send(conn_id, req).await.map(|m| Some(m.id)),
        };

        match outcome {
            Ok(offset) => {
                if let Some(ack) = ack {
                    self.send_ack(conn_id, ack, Ok(offset)).await;
                }
            }
            Err(e) => self.reject(conn_id, ack, e).await,
        }
    }

    /// Late identification of an anonymous connection. Switching an already
    /// identified connection to another user is ignored.
    pub async fn set_user_id(&self, conn_id: Uuid, user_key: String) -> Result<()> {
        match self.dispatcher.identity(conn_id).await {
            Some(current) if current == user_key => Ok(()),
            Some(current) => {
                warn!(
                    "Connection {} is {} and tried to switch to {}, ignoring",
                    conn_id, current, user_key
                );
                Ok(())
            }
            None => self.identify(conn_id, Identity::declared(user_key)).await,
        }
    }

    async fn identify(&self, conn_id: Uuid, identity: Identity) -> Result<()> {
        let Identity {
            user_key,
            display_name,
        } = identity;

        if !self.dispatcher.identify(conn_id, &user_key).await {
            return Err(ChatError::forbidden("connection is bound to another user"));
        }
        info!("Connection {} identified as {}", conn_id, user_key);

        let key = user_key.clone();
        let limit = self.settings.pending_digest;
        let pending = self
            .db
            .call(move |db| {
                db.remember_user(&key, display_name.as_deref())?;
                db.pending_digest(&key, limit)
            })
            .await?;

        self.dispatcher
            .emit_to_conn(conn_id, ServerEvent::Identified { user_id: user_key })
            .await;

        for message in pending {
            self.dispatcher
                .emit_to_conn(
                    conn_id,
                    ServerEvent::ReceiveNotification(NotificationPayload {
                        sender: message.sender_id,
                        chat_id: message.chat_id,
                        content: message.content,
                        pending: Some(true),
                        server_offset: Some(message.id),
                    }),
                )
                .await;
        }
        Ok(())
    }

    async fn caller(&self, conn_id: Uuid) -> Result<String> {
        self.dispatcher
            .identity(conn_id)
            .await
            .ok_or(ChatError::Unauthenticated)
    }

    pub async fn join(&self, session: &Session, req: JoinRequest) -> Result<Chat> {
        match req {
            JoinRequest::ByChatId { chat_id, offset } => {
                self.join_chat_id(session.conn_id, chat_id, offset, JoinKind::Chat)
                    .await
            }
            JoinRequest::ByPeer { peer_key, offset } => {
                let user = self.caller(session.conn_id).await?;
                let offset = offset.or(session.handshake_offset).unwrap_or(0);
                let me = user.clone();
                let (chat, participants) = self
                    .db
                    .call(move |db| {
                        let chat = db.get_or_create_direct_chat(&me, &peer_key)?;
                        let participants = db.participant_ids(chat.id)?;
                        Ok((chat, participants))
                    })
                    .await?;
                self.enter(session.conn_id, &user, chat, participants, offset, JoinKind::Chat)
                    .await
            }
        }
    }

    async fn join_chat_id(&self, conn_id: Uuid, chat_id: ChatId, offset: i64, kind: JoinKind) -> Result<Chat> {
        let user = self.caller(conn_id).await?;
        let me = user.clone();
        let (chat, participants) = self
            .db
            .call(move |db| {
                let (_, chat) = db.require_participant(chat_id, Some(&me))?;
                let participants = db.participant_ids(chat_id)?;
                Ok((chat, participants))
            })
            .await?;
        self.enter(conn_id, &user, chat, participants, offset, kind).await
    }

    /// Joins the room of an authorized chat, acknowledges it, replays history
    /// and marks what the caller has now seen as read.
    async fn enter(
        &self,
        conn_id: Uuid,
        user: &str,
        chat: Chat,
        participants: Vec<String>,
        offset: i64,
        kind: JoinKind,
    ) -> Result<Chat> {
        let (room, peer) = address(&chat, user, &participants)?;
        let peer = (!chat.is_group).then_some(peer);

        let chat_id = chat.id;
        let reader = user.to_string();
        let lookup = peer.clone();
        let page = self.settings.history_page;
        let (history, peer_name) = self
            .db
            .call(move |db| {
                let history = if offset > 0 {
                    db.list_since(chat_id, offset, None)?
                } else {
                    db.list_latest(chat_id, page)?
                };
                let changed = db.mark_read_up_to(chat_id, &reader)?;
                if changed > 0 {
                    debug!("{} read {} messages in chat {}", reader, changed, chat_id);
                }
                let peer_name = match lookup {
                    Some(peer) => db.display_name(&peer)?,
                    None => None,
                };
                Ok((history, peer_name))
            })
            .await?;

        self.dispatcher.join_room(conn_id, room.clone()).await;
        info!("{} joined {} (chat {}, offset {})", user, room, chat.id, offset);

        let descriptor = RoomDescriptor {
            room: room.to_string(),
            chat_id: chat.id,
            is_group: chat.is_group,
            peer,
            peer_name,
            name: chat.name.clone(),
        };
        let ack = match kind {
            JoinKind::Chat => ServerEvent::JoinChat(descriptor),
            JoinKind::Group => ServerEvent::JoinGroup(descriptor),
        };
        self.dispatcher.emit_to_conn(conn_id, ack).await;

        for message in &history {
            let send_to = if chat.is_group {
                chat.id.to_string()
            } else if message.sender_id == user {
                address(&chat, user, &participants)?.1
            } else {
                user.to_string()
            };
            self.dispatcher
                .emit_to_conn(conn_id, ServerEvent::ChatMessage(message_payload(message, send_to)))
                .await;
        }
        Ok(chat)
    }

    /// Persists a message, echoes it to the sender's connection and fans it
    /// out to the other participants.
    pub async fn send(&self, conn_id: Uuid, req: SendRequest) -> Result<Message> {
        let SendRequest { content, target } = req;
        if content.trim().is_empty() {
            return Err(ChatError::validation("message content must not be empty"));
        }
        let sender = self.caller(conn_id).await?;

        let me = sender.clone();
        let (chat, message, participants) = self
            .db
            .call(move |db| {
                let chat = resolve_target(db, &me, target)?;
                let message = db.append_message(chat.id, &me, &content, MessageType::Text)?;
                let participants = db.participant_ids(chat.id)?;
                Ok((chat, message, participants))
            })
            .await?;
        debug!("{} sent message {} to chat {}", sender, message.id, chat.id);

        let (room, send_to) = address(&chat, &sender, &participants)?;
        self.dispatcher.join_room(conn_id, room.clone()).await;

        let payload = message_payload(&message, send_to);
        self.dispatcher
            .emit_to_conn(conn_id, ServerEvent::ChatMessage(payload.clone()))
            .await;
        self.fan_out(&room, &payload, &participants, Some(conn_id)).await;

        Ok(message)
    }

    /// Live delivery for a message persisted outside a socket (REST post).
    pub async fn publish(&self, chat: &Chat, message: &Message, participants: &[String]) -> Result<()> {
        let (room, send_to) = address(chat, &message.sender_id, participants)?;
        let payload = message_payload(message, send_to);
        self.fan_out(&room, &payload, participants, None).await;
        Ok(())
    }

    /// Delivers a stored message to the chat room and to every other
    /// participant's personal room, plus a notification per participant.
    pub async fn fan_out(
        &self,
        room: &Room,
        payload: &ChatMessagePayload,
        participants: &[String],
        except: Option<Uuid>,
    ) {
        let others: Vec<&String> = participants
            .iter()
            .filter(|p| p.as_str() != payload.send_by)
            .collect();

        let mut rooms = vec![room.clone()];
        rooms.extend(others.iter().map(|p| Room::Personal(p.to_string())));
        let reached = self
            .dispatcher
            .emit_to_rooms(&rooms, ServerEvent::ChatMessage(payload.clone()), except)
            .await;

        for user in others {
            self.dispatcher
                .emit_to_user(
                    user,
                    ServerEvent::ReceiveNotification(NotificationPayload {
                        sender: payload.send_by.clone(),
                        chat_id: payload.chat_id,
                        content: payload.message.clone(),
                        pending: None,
                        server_offset: Some(payload.server_offset),
                    }),
                )
                .await;
        }
        debug!("Message {} delivered to {} connections", payload.server_offset, reached);
    }

    async fn send_ack(&self, conn_id: Uuid, ack: u64, outcome: std::result::Result<Option<MessageId>, String>) {
        let payload = match outcome {
            Ok(server_offset) => AckPayload {
                ack,
                status: AckStatus::Ok,
                server_offset,
                message: None,
            },
            Err(message) => AckPayload {
                ack,
                status: AckStatus::Error,
                server_offset: None,
                message: Some(message),
            },
        };
        self.dispatcher.emit_to_conn(conn_id, ServerEvent::Ack(payload)).await;
    }

    async fn reject(&self, conn_id: Uuid, ack: Option<u64>, err: ChatError) {
        if err.is_internal() {
            error!("Connection {}: {}", conn_id, err);
        } else {
            warn!("Connection {} rejected: {}", conn_id, err);
        }

        let message = err.public_message();
        self.dispatcher
            .emit_to_conn(
                conn_id,
                ServerEvent::ChatError {
                    message: message.clone(),
                },
            )
            .await;
        if let Some(ack) = ack {
            self.send_ack(conn_id, ack, Err(message)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;
    use waypoint_types::api::CreateGroupChatRequest;
    use waypoint_types::models::UserKey;

    fn engine() -> DeliveryEngine {
        let db = Arc::new(Database::open_in_memory().unwrap());
        DeliveryEngine::new(db, Dispatcher::new(), EngineSettings::default())
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn connect(engine: &DeliveryEngine, user: Option<&str>) -> (Session, UnboundedReceiver<ServerEvent>) {
        let (conn_id, rx) = engine.dispatcher().register().await;
        engine.on_connect(conn_id, user.map(Identity::declared)).await;
        (
            Session {
                conn_id,
                handshake_offset: None,
            },
            rx,
        )
    }

    fn frame(event: &str, data: serde_json::Value, ack: Option<u64>) -> ClientFrame {
        ClientFrame {
            event: event.to_string(),
            data,
            ack,
        }
    }

    fn group_with(engine: &DeliveryEngine, admin: &str, members: &[&str]) -> Chat {
        let req = CreateGroupChatRequest {
            name: Some("Crew".into()),
            participant_ids: Some(members.iter().map(|m| UserKey(m.to_string())).collect()),
            ..Default::default()
        };
        engine.db.create_group_chat(&req, admin).unwrap()
    }

    #[tokio::test]
    async fn test_direct_send_reaches_peer_personal_room() {
        let engine = engine();
        let (a, mut a_rx) = connect(&engine, Some("A")).await;
        let (_b, mut b_rx) = connect(&engine, Some("B")).await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        engine
            .handle_frame(&a, frame("chat_message", json!({"message": "hi", "send_to": "B"}), Some(1)))
            .await;

        let a_events = drain(&mut a_rx);
        assert_eq!(a_events.len(), 2);
        let ServerEvent::ChatMessage(echo) = &a_events[0] else {
            panic!("expected echo, got {:?}", a_events[0]);
        };
        assert_eq!(echo.server_offset, 1);
        assert_eq!(echo.send_to, "B");
        assert_eq!(
            a_events[1],
            ServerEvent::Ack(AckPayload {
                ack: 1,
                status: AckStatus::Ok,
                server_offset: Some(1),
                message: None,
            })
        );

        let b_events = drain(&mut b_rx);
        assert_eq!(b_events.len(), 2);
        let ServerEvent::ChatMessage(msg) = &b_events[0] else {
            panic!("expected chat_message, got {:?}", b_events[0]);
        };
        assert_eq!(msg.send_by, "A");
        assert_eq!(msg.message, "hi");
        let ServerEvent::ReceiveNotification(note) = &b_events[1] else {
            panic!("expected notification, got {:?}", b_events[1]);
        };
        assert_eq!(note.sender, "A");
        assert_eq!(note.content, "hi");
        assert_eq!(note.pending, None);

        assert!(engine.db.find_direct_chat("A", "B").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_peer_in_shared_room_gets_one_copy() {
        let engine = engine();
        let (a, mut a_rx) = connect(&engine, Some("A")).await;
        let (b, mut b_rx) = connect(&engine, Some("B")).await;

        engine.handle_frame(&b, frame("join_chat", json!("A"), None)).await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        engine
            .handle_frame(&a, frame("chat_message", json!({"message": "once", "send_to": "B"}), None))
            .await;

        let copies = drain(&mut b_rx)
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::ChatMessage(_)))
            .count();
        assert_eq!(copies, 1);
    }

    #[tokio::test]
    async fn test_unauthenticated_connection_cannot_send_or_join() {
        let engine = engine();
        let (anon, mut rx) = connect(&engine, None).await;
        assert!(drain(&mut rx).is_empty());

        engine
            .handle_frame(&anon, frame("chat_message", json!({"message": "x", "send_to": "B"}), Some(9)))
            .await;
        let events = drain(&mut rx);
        assert!(matches!(&events[0], ServerEvent::ChatError { .. }));
        assert!(matches!(
            &events[1],
            ServerEvent::Ack(AckPayload {
                ack: 9,
                status: AckStatus::Error,
                ..
            })
        ));

        engine.handle_frame(&anon, frame("join_chat", json!("B"), None)).await;
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ServerEvent::ChatError { .. }));

        assert!(engine.db.find_direct_chat("anon", "B").unwrap().is_none());
        assert!(engine.dispatcher().rooms_of(anon.conn_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_non_participant_is_rejected_before_mutation() {
        let engine = engine();
        let chat = group_with(&engine, "A", &["B"]);
        let (c, mut rx) = connect(&engine, Some("C")).await;
        drain(&mut rx);

        engine
            .handle_frame(&c, frame("chat_message", json!({"chatId": chat.id, "message": "let me in"}), None))
            .await;
        engine.handle_frame(&c, frame("join_group", json!(chat.id), None)).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, ServerEvent::ChatError { .. })));
        assert!(engine.db.list_latest(chat.id, 10).unwrap().is_empty());
        assert_eq!(engine.dispatcher().rooms_of(c.conn_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_group_join_replays_latest_and_marks_read() {
        let engine = engine();
        let chat = group_with(&engine, "A", &["B", "C"]);
        let first = engine.db.append_message(chat.id, "A", "one", MessageType::Text).unwrap();
        engine.db.append_message(chat.id, "C", "two", MessageType::Text).unwrap();
        engine.db.append_message(chat.id, "B", "mine", MessageType::Text).unwrap();

        let (b, mut rx) = connect(&engine, Some("B")).await;
        drain(&mut rx);
        engine
            .handle_frame(&b, frame("join_group", json!({"chatId": chat.id, "serverOffset": 0}), None))
            .await;

        let events = drain(&mut rx);
        let ServerEvent::JoinGroup(descriptor) = &events[0] else {
            panic!("expected join_group, got {:?}", events[0]);
        };
        assert_eq!(descriptor.room, format!("group:{}", chat.id));
        assert!(descriptor.is_group);

        let replay: Vec<_> = events[1..]
            .iter()
            .map(|e| match e {
                ServerEvent::ChatMessage(m) => m.message.clone(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(replay, vec!["one", "two", "mine"]);

        let stored = engine.db.list_since(chat.id, first.id - 1, None).unwrap();
        assert!(stored.iter().filter(|m| m.sender_id != "B").all(|m| m.is_read));
        assert!(!stored.iter().find(|m| m.sender_id == "B").unwrap().is_read);
    }

    #[tokio::test]
    async fn test_join_with_offset_replays_only_newer() {
        let engine = engine();
        let chat = engine.db.get_or_create_direct_chat("A", "B").unwrap();
        engine.db.remember_user("B", Some("Bea")).unwrap();
        let m1 = engine.db.append_message(chat.id, "B", "old", MessageType::Text).unwrap();
        engine.db.append_message(chat.id, "B", "new", MessageType::Text).unwrap();

        let (a, mut rx) = connect(&engine, Some("A")).await;
        drain(&mut rx);
        engine
            .handle_frame(&a, frame("join_chat", json!({"chatId": chat.id, "serverOffset": m1.id}), None))
            .await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        let ServerEvent::JoinChat(descriptor) = &events[0] else {
            panic!("expected join_chat, got {:?}", events[0]);
        };
        assert_eq!(descriptor.room, "A_B");
        assert_eq!(descriptor.peer.as_deref(), Some("B"));
        assert_eq!(descriptor.peer_name.as_deref(), Some("Bea"));
        let ServerEvent::ChatMessage(msg) = &events[1] else {
            panic!("expected chat_message, got {:?}", events[1]);
        };
        assert_eq!(msg.message, "new");
        assert_eq!(msg.send_to, "A");
    }

    #[tokio::test]
    async fn test_connect_pushes_pending_digest() {
        let engine = engine();
        let ab = engine.db.get_or_create_direct_chat("A", "B").unwrap();
        engine.db.append_message(ab.id, "B", "first", MessageType::Text).unwrap();
        let latest = engine.db.append_message(ab.id, "B", "second", MessageType::Text).unwrap();

        let (_a, mut rx) = connect(&engine, Some("A")).await;
        let events = drain(&mut rx);

        assert_eq!(events[0], ServerEvent::Identified { user_id: "A".into() });
        assert_eq!(
            events[1..],
            [ServerEvent::ReceiveNotification(NotificationPayload {
                sender: "B".into(),
                chat_id: ab.id,
                content: "second".into(),
                pending: Some(true),
                server_offset: Some(latest.id),
            })]
        );
    }

    #[tokio::test]
    async fn test_set_user_id_only_once() {
        let engine = engine();
        let (anon, mut rx) = connect(&engine, None).await;

        engine.handle_frame(&anon, frame("setUserId", json!(42), None)).await;
        assert_eq!(drain(&mut rx), vec![ServerEvent::Identified { user_id: "42".into() }]);

        engine.handle_frame(&anon, frame("setUserId", json!("mallory"), None)).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(engine.dispatcher().identity(anon.conn_id).await.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_numeric_peer_targets_existing_chat() {
        let engine = engine();
        let chat = group_with(&engine, "A", &["B"]);
        let (a, mut rx) = connect(&engine, Some("A")).await;
        drain(&mut rx);

        let message = engine
            .send(
                a.conn_id,
                SendRequest {
                    content: "to the group".into(),
                    target: SendTarget::Peer(chat.id.to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(message.chat_id, chat.id);
    }

    #[tokio::test]
    async fn test_empty_content_is_rejected() {
        let engine = engine();
        let (a, _rx) = connect(&engine, Some("A")).await;
        let err = engine
            .send(
                a.conn_id,
                SendRequest {
                    content: "   ".into(),
                    target: SendTarget::Peer("B".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }
}

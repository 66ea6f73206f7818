use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::watch;
use tracing::{info, warn};

use waypoint_types::events::{ClientFrame, ServerEvent};
use waypoint_types::models::Identity;

use crate::engine::{DeliveryEngine, Session};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// What the HTTP upgrade learned about the client before the socket opened.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub identity: Option<Identity>,
    pub server_offset: Option<i64>,
}

/// Runs one WebSocket connection until either side goes away. Identity was
/// resolved at the upgrade layer; an anonymous connection may still send
/// `setUserId` later.
pub async fn handle_connection(socket: WebSocket, engine: DeliveryEngine, handshake: Handshake) {
    let (mut sender, receiver) = socket.split();

    let (conn_id, mut events_rx) = engine.dispatcher().register().await;
    let who = handshake
        .identity
        .as_ref()
        .map(|i| i.user_key.clone())
        .unwrap_or_else(|| "anonymous".to_string());
    info!("{} connected ({})", who, conn_id);

    let session = Session {
        conn_id,
        handshake_offset: handshake.server_offset,
    };
    engine.on_connect(conn_id, handshake.identity).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward server events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Dropping unserializable event for {}: {}", conn_id, e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping {}", missed_heartbeats, conn_id);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read frames from client until the writer goes away. A frame already
    // being handled is never cut short, so a persisted message is always
    // fanned out.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut recv_task = tokio::spawn(read_frames(
        receiver,
        engine.clone(),
        session,
        pong_flag_recv,
        shutdown_rx,
    ));

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => {
            let _ = shutdown_tx.send(true);
            let _ = (&mut recv_task).await;
        }
        _ = &mut recv_task => send_task.abort(),
    }

    engine.dispatcher().unregister(conn_id).await;
    info!("{} disconnected ({})", who, conn_id);
}

/// Client read loop. Each frame is handled to completion before the next one
/// is read; `shutdown` only interrupts the wait for a new frame.
async fn read_frames<S, E>(
    mut frames: S,
    engine: DeliveryEngine,
    session: Session,
    pong_received: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    let conn_id = session.conn_id;
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = frames.next() => next,
        };
        let Some(Ok(msg)) = next else { break };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => engine.handle_frame(&session, frame).await,
                Err(e) => {
                    warn!(
                        "{} bad frame: {} -- raw: {}",
                        conn_id,
                        e,
                        text.chars().take(200).collect::<String>()
                    );
                    engine
                        .dispatcher()
                        .emit_to_conn(
                            conn_id,
                            ServerEvent::ChatError {
                                message: format!("malformed frame: {}", e),
                            },
                        )
                        .await;
                }
            },
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tokio::sync::mpsc::UnboundedReceiver;
    use waypoint_db::Database;

    use crate::dispatcher::Dispatcher;
    use crate::engine::EngineSettings;

    async fn connect(engine: &DeliveryEngine, user: &str) -> (Session, UnboundedReceiver<ServerEvent>) {
        let (conn_id, mut rx) = engine.dispatcher().register().await;
        engine.on_connect(conn_id, Some(Identity::declared(user))).await;
        while rx.try_recv().is_ok() {}
        (
            Session {
                conn_id,
                handshake_offset: None,
            },
            rx,
        )
    }

    fn text_frames(raw: &[&str]) -> impl Stream<Item = Result<Message, axum::Error>> + Unpin {
        let frames: Vec<_> = raw.iter().map(|t| Ok(Message::Text(t.to_string().into()))).collect();
        stream::iter(frames)
    }

    #[tokio::test]
    async fn test_malformed_frames_get_chat_error() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let engine = DeliveryEngine::new(db, Dispatcher::new(), EngineSettings::default());
        let (a, mut a_rx) = connect(&engine, "A").await;
        let (_tx, shutdown_rx) = watch::channel(false);

        let frames = text_frames(&["not json", r#"{"data": {"message": "hi"}}"#, r#"{"event": "join_chat", "ack": "x"}"#]);
        read_frames(frames, engine.clone(), a, Arc::new(AtomicBool::new(true)), shutdown_rx).await;

        let mut errors = 0;
        while let Ok(event) = a_rx.try_recv() {
            let ServerEvent::ChatError { message } = event else {
                panic!("expected chat_error, got {:?}", event);
            };
            assert!(message.starts_with("malformed frame"));
            errors += 1;
        }
        assert_eq!(errors, 3);
    }

    #[tokio::test]
    async fn test_shutdown_lets_in_flight_send_finish() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let engine = DeliveryEngine::new(db.clone(), Dispatcher::new(), EngineSettings::default());
        let (a, _a_rx) = connect(&engine, "A").await;
        let (_b, mut b_rx) = connect(&engine, "B").await;

        // Hold the store so the send below stalls after it has been read.
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let holder = db.clone();
        let stall = std::thread::spawn(move || {
            holder.with_conn(|_| {
                locked_tx.send(()).ok();
                release_rx.recv().ok();
                Ok(())
            })
        });
        locked_rx.recv().unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let frames = text_frames(&[r#"{"event": "chat_message", "data": {"message": "hi", "send_to": "B"}}"#])
            .chain(stream::pending());
        let reader = tokio::spawn(read_frames(
            frames,
            engine.clone(),
            a,
            Arc::new(AtomicBool::new(true)),
            shutdown_rx,
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown_tx.send(true).unwrap();
        release_tx.send(()).unwrap();
        stall.join().unwrap().unwrap();
        tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .expect("reader stops after the in-flight frame")
            .unwrap();

        let mut delivered = false;
        while let Ok(event) = b_rx.try_recv() {
            if let ServerEvent::ChatMessage(msg) = event {
                assert_eq!(msg.message, "hi");
                delivered = true;
            }
        }
        assert!(delivered);
    }
}

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::warn;

use waypoint_db::ChatError;
use waypoint_types::api::{CreateMessageRequest, MessageEdited, UpdateMessageRequest};
use waypoint_types::models::{ChatId, Identity, MessageId, MessageType};

use crate::auth::AppState;
use crate::error::ApiResult;

const DEFAULT_PAGE: u32 = 50;
const MAX_PAGE: u32 = 200;

/// Raw query strings; anything unparsable falls back to the defaults
/// instead of failing the request.
#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub limit: Option<String>,
    /// Cursor: only messages with a smaller id.
    pub before_id: Option<String>,
}

/// Clamps a requested page size into `1..=MAX_PAGE`.
fn page_limit(raw: Option<&str>) -> u32 {
    let raw = match raw.map(str::trim) {
        None | Some("") => return DEFAULT_PAGE,
        Some(raw) => raw,
    };
    match raw.parse::<i64>() {
        Ok(n) => n.clamp(1, MAX_PAGE as i64) as u32,
        // too many digits for i64
        Err(_) if raw.bytes().all(|b| b.is_ascii_digit()) => MAX_PAGE,
        Err(_) => DEFAULT_PAGE,
    }
}

fn cursor(raw: Option<&str>) -> Option<MessageId> {
    raw.and_then(|r| r.trim().parse::<MessageId>().ok())
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<MessageQuery>,
    Extension(caller): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let limit = page_limit(query.limit.as_deref());
    let before_id = cursor(query.before_id.as_deref());

    let messages = state
        .db
        .call(move |db| {
            db.require_participant(chat_id, Some(&caller.user_key))?;
            db.list_before(chat_id, before_id, limit)
        })
        .await?;
    Ok(Json(messages))
}

/// Stores a message and delivers it live to connected participants.
pub async fn create_message(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(caller): Extension<Identity>,
    Json(req): Json<CreateMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.content.trim().is_empty() {
        return Err(ChatError::validation("content must not be empty").into());
    }
    let kind = match req.kind.as_deref() {
        None => MessageType::Text,
        Some(k) => k.parse::<MessageType>().map_err(ChatError::Validation)?,
    };

    let (chat, message, participants) = state
        .db
        .call(move |db| {
            let (sender, chat) = db.require_participant(chat_id, Some(&caller.user_key))?;
            let message = db.append_message(chat_id, &sender, &req.content, kind)?;
            let participants = db.participant_ids(chat_id)?;
            Ok((chat, message, participants))
        })
        .await?;

    if let Err(e) = state.engine.publish(&chat, &message, &participants).await {
        warn!("Live delivery of message {} failed: {}", message.id, e);
    }
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn update_message(
    State(state): State<AppState>,
    Path((chat_id, message_id)): Path<(ChatId, MessageId)>,
    Extension(caller): Extension<Identity>,
    Json(req): Json<UpdateMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let edited = state
        .db
        .call(move |db| {
            db.require_author_or_admin(chat_id, message_id, Some(&caller.user_key))?;
            db.edit_message(chat_id, message_id, &req.content)
        })
        .await?;
    Ok(Json(MessageEdited {
        id: edited.id,
        chat_id: edited.chat_id,
        content: edited.content,
    }))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path((chat_id, message_id)): Path<(ChatId, MessageId)>,
    Extension(caller): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    state
        .db
        .call(move |db| {
            db.require_author_or_admin(chat_id, message_id, Some(&caller.user_key))?;
            db.delete_message(chat_id, message_id)
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

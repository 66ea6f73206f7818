use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use waypoint_types::api::{AddParticipantRequest, ParticipantAdded};
use waypoint_types::models::{ChatId, Identity};

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn list_participants(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(caller): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let participants = state
        .db
        .call(move |db| {
            db.require_participant(chat_id, Some(&caller.user_key))?;
            db.list_participants(chat_id)
        })
        .await?;
    Ok(Json(participants))
}

pub async fn add_participant(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(caller): Extension<Identity>,
    Json(req): Json<AddParticipantRequest>,
) -> ApiResult<impl IntoResponse> {
    let user_id = req.user_id.into_inner();
    let added = user_id.clone();
    state
        .db
        .call(move |db| {
            db.require_admin(chat_id, Some(&caller.user_key))?;
            db.add_participant(chat_id, &added)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(ParticipantAdded { chat_id, user_id })))
}

pub async fn remove_participant(
    State(state): State<AppState>,
    Path((chat_id, user_key)): Path<(ChatId, String)>,
    Extension(caller): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let removed = user_key.clone();
    state
        .db
        .call(move |db| {
            db.require_admin(chat_id, Some(&caller.user_key))?;
            db.remove_participant(chat_id, &removed)
        })
        .await?;
    info!("{} removed from chat {}", user_key, chat_id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn join_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(caller): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let user_id = state
        .db
        .call(move |db| db.join_group(chat_id, Some(&caller.user_key)))
        .await?;
    Ok((StatusCode::CREATED, Json(ParticipantAdded { chat_id, user_id })))
}

pub async fn leave_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(caller): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    state
        .db
        .call(move |db| db.leave_group(chat_id, Some(&caller.user_key)))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

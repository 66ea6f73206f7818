use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use waypoint_db::ChatError;
use waypoint_types::api::{ChatDetailResponse, ChatResponse, CreateGroupChatRequest, UpdateGroupChatRequest};
use waypoint_types::models::{ChatId, Identity};

use crate::auth::AppState;
use crate::error::ApiResult;

fn check_inbox_owner(state: &AppState, caller: &Identity, user_key: &str) -> Result<(), ChatError> {
    if !state.public_user_inbox && caller.user_key != user_key {
        return Err(ChatError::forbidden("you can only list your own chats"));
    }
    Ok(())
}

pub async fn list_my_chats(
    State(state): State<AppState>,
    Extension(caller): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let entries = state
        .db
        .call(move |db| db.list_for_user(&caller.user_key))
        .await?;
    Ok(Json(entries))
}

pub async fn list_user_chats(
    State(state): State<AppState>,
    Path(user_key): Path<String>,
    Extension(caller): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    check_inbox_owner(&state, &caller, &user_key)?;
    let entries = state.db.call(move |db| db.list_for_user(&user_key)).await?;
    Ok(Json(entries))
}

pub async fn list_my_groups(
    State(state): State<AppState>,
    Extension(caller): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let chats = state
        .db
        .call(move |db| db.list_groups_for_user(&caller.user_key))
        .await?;
    Ok(Json(chats))
}

pub async fn list_user_groups(
    State(state): State<AppState>,
    Path(user_key): Path<String>,
    Extension(caller): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    check_inbox_owner(&state, &caller, &user_key)?;
    let chats = state
        .db
        .call(move |db| db.list_groups_for_user(&user_key))
        .await?;
    Ok(Json(chats))
}

pub async fn get_chat_by_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<i64>,
    Extension(caller): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let detail = state
        .db
        .call(move |db| {
            let chat = db
                .get_group_chat_by_trip(trip_id)?
                .ok_or_else(|| ChatError::not_found("chat not found"))?;
            let (_, chat) = db.require_participant(chat.id, Some(&caller.user_key))?;
            let participants = db.list_participants(chat.id)?;
            Ok(ChatDetailResponse { chat, participants })
        })
        .await?;
    Ok(Json(detail))
}

pub async fn create_group_chat(
    State(state): State<AppState>,
    Extension(caller): Extension<Identity>,
    Json(req): Json<CreateGroupChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let chat = state
        .db
        .call(move |db| db.create_group_chat(&req, &caller.user_key))
        .await?;
    Ok((StatusCode::CREATED, Json(ChatResponse { chat })))
}

pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(caller): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let detail = state
        .db
        .call(move |db| {
            let (_, chat) = db.require_participant(chat_id, Some(&caller.user_key))?;
            let participants = db.list_participants(chat_id)?;
            Ok(ChatDetailResponse { chat, participants })
        })
        .await?;
    Ok(Json(detail))
}

pub async fn update_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(caller): Extension<Identity>,
    Json(req): Json<UpdateGroupChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let chat = state
        .db
        .call(move |db| {
            db.require_admin(chat_id, Some(&caller.user_key))?;
            db.update_group_chat(chat_id, &req)
        })
        .await?;
    Ok(Json(ChatResponse { chat }))
}

pub async fn delete_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(caller): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let admin = state
        .db
        .call(move |db| {
            let (admin, _) = db.require_admin(chat_id, Some(&caller.user_key))?;
            db.delete_group_chat(chat_id)?;
            Ok(admin)
        })
        .await?;
    info!("Group chat {} deleted by {}", chat_id, admin);
    Ok(StatusCode::NO_CONTENT)
}

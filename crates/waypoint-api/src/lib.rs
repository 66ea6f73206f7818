pub mod auth;
pub mod chats;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod participants;

use axum::{
    Router,
    routing::{delete, get, patch, post},
};

use crate::auth::AppState;
use crate::middleware::require_auth;

/// All REST routes. Every route requires an authenticated caller.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chats", get(chats::list_my_chats).post(chats::create_group_chat))
        .route("/chats/me", get(chats::list_my_groups))
        .route("/chats/user/{user_key}", get(chats::list_user_chats))
        .route("/chats/user/{user_key}/groups", get(chats::list_user_groups))
        .route("/chats/trip/{trip_id}", get(chats::get_chat_by_trip))
        .route(
            "/chats/{chat_id}",
            get(chats::get_chat).patch(chats::update_chat).delete(chats::delete_chat),
        )
        .route(
            "/chats/{chat_id}/participants",
            get(participants::list_participants).post(participants::add_participant),
        )
        .route(
            "/chats/{chat_id}/participants/{user_key}",
            delete(participants::remove_participant),
        )
        .route("/chats/{chat_id}/join", post(participants::join_chat))
        .route("/chats/{chat_id}/leave", post(participants::leave_chat))
        .route(
            "/chats/{chat_id}/messages",
            get(messages::get_messages).post(messages::create_message),
        )
        .route(
            "/chats/{chat_id}/messages/{message_id}",
            patch(messages::update_message).delete(messages::delete_message),
        )
        .layer(axum::middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

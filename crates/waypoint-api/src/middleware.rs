use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use waypoint_db::ChatError;

use crate::auth::AppState;
use crate::error::ApiError;

/// Header carrying the caller's self-declared user key, used when no token
/// validates.
pub const DECLARED_USER_HEADER: &str = "x-user-id";

/// Credential from `Authorization: Bearer` or the `access_token` cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());

    bearer.or_else(|| {
        CookieJar::from_headers(headers)
            .get("access_token")
            .map(|c| c.value().to_string())
    })
}

/// Resolves the caller and stores its `Identity` in the request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = req.headers();
    let token = token_from_headers(headers);
    let declared = headers
        .get(DECLARED_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let identity = state
        .authenticator
        .resolve(token.as_deref(), declared.as_deref())
        .await
        .ok_or(ChatError::Unauthenticated)?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

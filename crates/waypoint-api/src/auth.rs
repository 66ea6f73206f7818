use std::sync::Arc;
use std::time::Duration;

use reqwest::header::COOKIE;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use waypoint_db::Database;
use waypoint_gateway::DeliveryEngine;
use waypoint_types::models::Identity;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub engine: DeliveryEngine,
    pub authenticator: Authenticator,
    /// Skip the ownership check on `/chats/user/{user_key}` listings.
    pub public_user_inbox: bool,
}

/// Fields of the identity service's user object tried in order for the key.
const USER_KEY_FIELDS: [&str; 5] = ["id", "user_id", "userId", "username", "email"];
const DISPLAY_NAME_FIELDS: [&str; 4] = ["display_name", "displayName", "name", "username"];

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no identity service configured")]
    NotConfigured,

    #[error("identity service unreachable: {0}")]
    Request(#[from] reqwest::Error),

    #[error("identity service rejected the token ({0})")]
    Rejected(u16),

    #[error("identity service returned no usable user key")]
    MissingUserKey,

    #[error("token contains characters not allowed in a cookie value")]
    MalformedToken,
}

/// Validates credentials against the external identity service.
#[derive(Clone)]
pub struct Authenticator {
    client: reqwest::Client,
    validate_url: Option<String>,
}

impl Authenticator {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let validate_url = base_url
            .map(|u| u.trim_end_matches('/'))
            .filter(|u| !u.is_empty())
            .map(|u| format!("{}/api/auth/validate", u));
        Ok(Self {
            client,
            validate_url,
        })
    }

    /// Asks the identity service who owns `token`. The token travels as the
    /// `access_token` cookie, so anything that could end or split the cookie
    /// is refused before a request is made.
    pub async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        let url = self.validate_url.as_deref().ok_or(AuthError::NotConfigured)?;
        if !is_cookie_safe(token) {
            return Err(AuthError::MalformedToken);
        }

        let resp = self
            .client
            .get(url)
            .header(COOKIE, format!("access_token={}", token))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AuthError::Rejected(resp.status().as_u16()));
        }

        let body: Value = resp.json().await?;
        let user = body.get("data").unwrap_or(&body);
        identity_from_user(user).ok_or(AuthError::MissingUserKey)
    }

    /// Token first; on any validation failure fall back to the identity the
    /// client declared. `None` leaves the caller unauthenticated.
    pub async fn resolve(&self, token: Option<&str>, declared: Option<&str>) -> Option<Identity> {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            match self.validate(token).await {
                Ok(identity) => {
                    debug!("Token validated for {}", identity.user_key);
                    return Some(identity);
                }
                Err(AuthError::NotConfigured) => {}
                Err(e) => warn!("Token validation failed, using declared identity: {}", e),
            }
        }
        declared
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(Identity::declared)
    }
}

fn is_cookie_safe(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_graphic() && !matches!(c, ';' | ',' | '"' | '\\'))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn identity_from_user(user: &Value) -> Option<Identity> {
    let user_key = USER_KEY_FIELDS
        .iter()
        .find_map(|f| user.get(*f).and_then(scalar_text))?;
    let display_name = DISPLAY_NAME_FIELDS
        .iter()
        .find_map(|f| user.get(*f).and_then(|v| v.as_str()))
        .map(str::to_string);
    Some(Identity {
        user_key,
        display_name,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{
        Json, Router,
        http::{HeaderMap, StatusCode, header},
        routing::get,
    };
    use serde_json::json;

    async fn validate_handler(headers: HeaderMap) -> (StatusCode, Json<Value>) {
        let cookie = headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        match cookie {
            "access_token=good" => (
                StatusCode::OK,
                Json(json!({"data": {"id": 7, "username": "ana", "name": "Ana Lima"}})),
            ),
            "access_token=email-only" => (
                StatusCode::OK,
                Json(json!({"data": {"id": null, "email": "b@example.com"}})),
            ),
            "access_token=bob" => (StatusCode::OK, Json(json!({"data": {"userId": "bob"}}))),
            "access_token=slow" => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                (StatusCode::OK, Json(json!({"data": {"id": 1}})))
            }
            _ => (StatusCode::UNAUTHORIZED, Json(json!({"message": "invalid token"}))),
        }
    }

    /// Identity service stand-in on an ephemeral port. Returns its base URL.
    pub(crate) async fn mock_identity_service() -> String {
        let app = Router::new().route("/api/auth/validate", get(validate_handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_validate_extracts_user_key_and_name() {
        let base = mock_identity_service().await;
        let auth = Authenticator::new(Some(&base), Duration::from_secs(2)).unwrap();

        let identity = auth.validate("good").await.unwrap();
        assert_eq!(identity.user_key, "7");
        assert_eq!(identity.display_name.as_deref(), Some("Ana Lima"));

        let identity = auth.validate("email-only").await.unwrap();
        assert_eq!(identity.user_key, "b@example.com");
        assert!(identity.display_name.is_none());

        assert!(matches!(auth.validate("nope").await, Err(AuthError::Rejected(401))));
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_declared() {
        let base = mock_identity_service().await;
        let auth = Authenticator::new(Some(&base), Duration::from_millis(200)).unwrap();

        let rejected = auth.resolve(Some("nope"), Some("carol")).await.unwrap();
        assert_eq!(rejected, Identity::declared("carol"));

        let timed_out = auth.resolve(Some("slow"), Some("dave")).await.unwrap();
        assert_eq!(timed_out.user_key, "dave");

        assert!(auth.resolve(Some("nope"), None).await.is_none());
        assert!(auth.resolve(None, Some("  ")).await.is_none());
    }

    #[tokio::test]
    async fn test_tokens_that_would_split_the_cookie_are_refused() {
        let base = mock_identity_service().await;
        let auth = Authenticator::new(Some(&base), Duration::from_secs(2)).unwrap();

        for token in ["good; admin=1", "good,x", "go od", "good\r\nX-Evil: 1", "caf\u{e9}"] {
            assert!(
                matches!(auth.validate(token).await, Err(AuthError::MalformedToken)),
                "{:?} accepted",
                token
            );
        }
        assert_eq!(
            auth.resolve(Some("good;x"), Some("carol")).await,
            Some(Identity::declared("carol"))
        );
        assert_eq!(auth.resolve(Some("good"), None).await.unwrap().user_key, "7");
    }

    #[test]
    fn test_cookie_safe_tokens() {
        assert!(is_cookie_safe("eyJhbGciOi.J9-_x/+="));
        assert!(!is_cookie_safe(""));
        assert!(!is_cookie_safe("a;b"));
        assert!(!is_cookie_safe("a\tb"));
        assert!(!is_cookie_safe("a\"b"));
    }

    #[tokio::test]
    async fn test_unconfigured_service_uses_declared_identity() {
        let auth = Authenticator::new(None, Duration::from_secs(1)).unwrap();
        assert!(matches!(auth.validate("good").await, Err(AuthError::NotConfigured)));
        assert_eq!(
            auth.resolve(Some("good"), Some("erin")).await,
            Some(Identity::declared("erin"))
        );
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

/// Failure taxonomy shared by the REST handlers and the realtime gateway.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Malformed input
    #[error("{0}")]
    Validation(String),

    #[error("a direct chat needs two distinct, non-empty user ids")]
    InvalidPair,

    #[error("could not determine the authenticated user")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ChatError::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ChatError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ChatError::NotFound(msg.into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ChatError::Validation(_) | ChatError::InvalidPair | ChatError::Unauthenticated => 400,
            ChatError::Forbidden(_) => 403,
            ChatError::NotFound(_) => 404,
            ChatError::Conflict(_) => 409,
            ChatError::Internal(_) => 500,
        }
    }

    /// Text safe to show to the caller. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, ChatError::Internal(_))
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(e: rusqlite::Error) -> Self {
        ChatError::Internal(format!("sqlite: {}", e))
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(e: tokio::task::JoinError) -> Self {
        ChatError::Internal(format!("blocking task failed: {}", e))
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(e: anyhow::Error) -> Self {
        ChatError::Internal(e.to_string())
    }
}

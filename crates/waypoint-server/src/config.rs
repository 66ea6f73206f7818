use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

/// Runtime settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Base URL of the identity service; validation is disabled when unset.
    pub auth_url: Option<String>,
    pub auth_timeout: Duration,
    pub frontend_origins: Vec<String>,
    pub public_user_inbox: bool,
    pub history_page: u32,
    pub pending_digest: u32,
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let frontend_origins = lookup("WAYPOINT_FRONTEND_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        Ok(Self {
            host: lookup("WAYPOINT_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "WAYPOINT_PORT", 4003)?,
            db_path: PathBuf::from(lookup("WAYPOINT_DB_PATH").unwrap_or_else(|| "waypoint.db".into())),
            auth_url: lookup("WAYPOINT_AUTH_URL").filter(|u| !u.trim().is_empty()),
            auth_timeout: Duration::from_millis(parse_or(&lookup, "WAYPOINT_AUTH_TIMEOUT_MS", 3000)?),
            frontend_origins,
            public_user_inbox: parse_or(&lookup, "WAYPOINT_PUBLIC_USER_INBOX", false)?,
            history_page: parse_or(&lookup, "WAYPOINT_HISTORY_PAGE", 50)?,
            pending_digest: parse_or(&lookup, "WAYPOINT_PENDING_DIGEST", 20)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 4003);
        assert_eq!(config.db_path, PathBuf::from("waypoint.db"));
        assert!(config.auth_url.is_none());
        assert_eq!(config.auth_timeout, Duration::from_secs(3));
        assert_eq!(config.frontend_origins, vec!["http://localhost:5173"]);
        assert!(!config.public_user_inbox);
        assert_eq!(config.history_page, 50);
        assert_eq!(config.pending_digest, 20);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("WAYPOINT_PORT", "8080"),
            ("WAYPOINT_AUTH_URL", "http://users:4000"),
            ("WAYPOINT_FRONTEND_ORIGINS", "https://a.example, https://b.example,"),
            ("WAYPOINT_PUBLIC_USER_INBOX", "true"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.auth_url.as_deref(), Some("http://users:4000"));
        assert_eq!(config.frontend_origins, vec!["https://a.example", "https://b.example"]);
        assert!(config.public_user_inbox);
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let err = config_from(&[("WAYPOINT_HISTORY_PAGE", "lots")]).unwrap_err();
        assert!(err.to_string().contains("WAYPOINT_HISTORY_PAGE"));
    }
}

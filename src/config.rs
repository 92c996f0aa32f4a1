//! Client configuration, loaded from environment variables with defaults that
//! match a local development signaling server. The join token is redacted in
//! Debug output.

use crate::moderation::Role;
use std::collections::HashMap;
use std::env;
use std::fmt;

/// Default signaling server endpoint.
pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:8080";

/// Default room joined when the user does not type one.
pub const DEFAULT_ROOM: &str = "test-channel";

/// Application identifier presented to the transport on join.
pub const DEFAULT_APP_ID: &str = "local-dev";

/// Total seats in a classroom: one presenter plus ten students.
pub const SEAT_CAPACITY: usize = 11;

#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    /// Application identifier (`LC_APP_ID`).
    pub app_id: String,

    /// Websocket signaling endpoint (`LC_SIGNALING_URL`).
    pub signaling_url: String,

    /// Default room name (`LC_ROOM`).
    pub default_room: String,

    /// Optional join token (`LC_TOKEN`). Redacted in Debug output.
    pub token: Option<String>,

    /// Local role (`LC_ROLE`): `teacher` (default) or `student`. Teachers get
    /// the moderation capability, students never do.
    pub role: Role,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("app_id", &self.app_id)
            .field("signaling_url", &self.signaling_url)
            .field("default_room", &self.default_room)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("role", &self.role)
            .finish()
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let signaling_url = vars
            .get("LC_SIGNALING_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SIGNALING_URL.to_string());
        if !signaling_url.starts_with("ws://") && !signaling_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue {
                name: "LC_SIGNALING_URL",
                reason: "must be a ws:// or wss:// URL".to_string(),
            });
        }

        let role = match vars.get("LC_ROLE").map(String::as_str) {
            None | Some("teacher") => Role::Presenter,
            Some("student") => Role::Student,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "LC_ROLE",
                    reason: format!("expected 'teacher' or 'student', got '{other}'"),
                })
            }
        };

        Ok(Self {
            app_id: vars
                .get("LC_APP_ID")
                .cloned()
                .unwrap_or_else(|| DEFAULT_APP_ID.to_string()),
            signaling_url,
            default_room: vars
                .get("LC_ROOM")
                .cloned()
                .unwrap_or_else(|| DEFAULT_ROOM.to_string()),
            token: vars.get("LC_TOKEN").cloned(),
            role,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        reason: String,
    },
}

impl From<ConfigError> for crate::error::ClassroomError {
    fn from(err: ConfigError) -> Self {
        crate::error::ClassroomError::Config(err.to_string())
    }
}

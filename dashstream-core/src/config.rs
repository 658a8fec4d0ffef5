use std::{path::PathBuf, time::Duration};

use crate::error::ConfigError;

pub const MAX_USERNAME_LENGTH: usize = 25;

/// Outbound messages buffered per client before the oldest are dropped.
pub const CLIENT_QUEUE_CAPACITY: usize = 1000;
/// Inbound control frames buffered per client.
pub const CONTROL_CHANNEL_CAPACITY: usize = 100;
/// Command + topic + JWT for the longest allowed username, with some slack.
pub const MAX_CONTROL_FRAME_SIZE: usize = 400 + MAX_USERNAME_LENGTH + 10;

pub const VISUALIZER_CAPACITY: usize = 3000;
pub const VISUALIZER_INIT_COUNT: usize = 3000;
pub const DB_SIZE_HISTORY_LENGTH: usize = 600;
/// Milestones replayed to a new subscriber besides the latest one.
pub const MILESTONE_REPLAY_WINDOW: u32 = 10;

pub const INIT_VALUE_TIMEOUT: Duration = Duration::from_secs(2);
pub const NODE_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound for the session lifetime, keeps token expiry arithmetic in range.
pub const MAX_SESSION_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub period: Duration,
    pub max_requests: u32,
    pub max_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period: Duration::from_secs(60),
            max_requests: 20,
            max_burst: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub username: String,
    /// argon2 PHC string. Without it, password logins always fail.
    pub password_hash: Option<String>,
    pub session_timeout: Duration,
    pub identity_file: PathBuf,
    /// Hex Ed25519 key, 32-byte seed or 64-byte keypair. Empty means unset.
    pub identity_private_key: String,
    pub rate_limit: RateLimitConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password_hash: None,
            session_timeout: Duration::from_secs(72 * 60 * 60),
            identity_file: PathBuf::from("identity.key"),
            identity_private_key: String::new(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub node_url: String,
    pub websocket_write_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub feed_interval: Duration,
    pub db_size_interval: Duration,
    pub client_queue_capacity: usize,
    pub visualizer_capacity: usize,
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "localhost:8081".to_string(),
            node_url: "http://localhost:14265".to_string(),
            websocket_write_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            feed_interval: Duration::from_secs(1),
            db_size_interval: Duration::from_secs(60),
            client_queue_capacity: CLIENT_QUEUE_CAPACITY,
            visualizer_capacity: VISUALIZER_CAPACITY,
            auth: AuthConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let username = &self.auth.username;
        if username.is_empty() {
            return Err(ConfigError::Empty("auth username"));
        }
        if username.chars().count() > MAX_USERNAME_LENGTH {
            return Err(ConfigError::TooLong {
                name: "auth username",
                max: MAX_USERNAME_LENGTH,
            });
        }
        if self.bind_address.is_empty() {
            return Err(ConfigError::Empty("bind address"));
        }

        for (name, value) in [
            ("auth session timeout", self.auth.session_timeout),
            ("websocket write timeout", self.websocket_write_timeout),
            ("heartbeat interval", self.heartbeat_interval),
            ("feed interval", self.feed_interval),
            ("database size interval", self.db_size_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::NotPositive(name));
            }
        }

        if self.auth.session_timeout > MAX_SESSION_TIMEOUT {
            return Err(ConfigError::TooLarge {
                name: "auth session timeout",
                max: MAX_SESSION_TIMEOUT,
            });
        }

        let rate_limit = &self.auth.rate_limit;
        if rate_limit.enabled {
            if rate_limit.period.is_zero() {
                return Err(ConfigError::NotPositive("auth rate limit period"));
            }
            if rate_limit.max_burst == 0 {
                return Err(ConfigError::NotPositive("auth rate limit burst"));
            }
        }

        if self.client_queue_capacity == 0 {
            return Err(ConfigError::NotPositive("client queue capacity"));
        }
        if self.visualizer_capacity == 0 {
            return Err(ConfigError::NotPositive("visualizer capacity"));
        }

        Ok(())
    }
}

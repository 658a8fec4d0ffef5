use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;

use crate::websocket::hub::ConnectionId;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("deadline elapsed while waiting for queue space")]
    Timeout,

    #[error("outbound queue closed")]
    QueueClosed,

    #[error("connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("signing key unavailable")]
    KeyUnavailable,

    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("invalid password hash: {0}")]
    InvalidPasswordHash(String),
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("configuration contains an invalid private key")]
    InvalidConfiguredKey,

    #[error("stored private key for identity doesn't match private key in config")]
    Mismatch,

    #[error("unable to access identity file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to decode identity file: {0}")]
    Pem(String),
}

impl IdentityError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream call timed out")]
    Timeout,

    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream responded with status {0}")]
    Status(u16),

    #[error("upstream does not support {0}")]
    Unsupported(&'static str),

    #[error("failed to decode upstream data: {0}")]
    Decode(String),
}

impl From<tokio::time::error::Elapsed> for UpstreamError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("{name} has a max length of {max}")]
    TooLong { name: &'static str, max: usize },

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),

    #[error("{name} must not exceed {max:?}")]
    TooLarge { name: &'static str, max: Duration },
}

/// Errors that abort startup. Continuing with any of these would run the
/// dashboard with a broken trust boundary.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("identity initialization failed: {0}")]
    Identity(#[from] IdentityError),

    #[error("auth initialization failed: {0}")]
    Auth(#[from] AuthError),

    #[error("failed to bind '{addr}': {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}

//! Error types for mail-backup

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection to {server} failed: {reason}")]
    Connect { server: String, reason: String },

    #[error("Login as '{username}' failed: {reason}")]
    Auth { username: String, reason: String },

    #[error("Mailbox '{mailbox}' unavailable: {reason}")]
    Mailbox { mailbox: String, reason: String },

    #[error("Fetch of message {id} in '{mailbox}' failed: {reason}")]
    Fetch {
        mailbox: String,
        id: String,
        reason: String,
    },

    #[error("Write to {} failed: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error ends the whole run rather than one mailbox or
    /// message.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Auth { .. } | Self::Config(_)
        )
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

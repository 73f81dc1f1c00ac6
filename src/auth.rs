//! Login retry policy with a fallback identity
//!
//! A two-state machine: try the primary identity; if the server rejects
//! it and a distinct fallback identity exists, try that once. When both
//! fail the primary identity's error is the one reported.

use crate::config::ConnectionConfig;
use crate::error::Error;

#[derive(Debug)]
enum State {
    Primary,
    Fallback { primary_error: Error },
    Failed { primary_error: Error },
}

/// Drives the identity sequence for one login.
///
/// ```
/// use mail_backup::{Error, LoginFlow};
///
/// let mut flow = LoginFlow::new("alice@example.com", Some("alice"));
/// assert_eq!(flow.identity(), Some("alice@example.com"));
///
/// let rejected = Error::Auth { username: "alice@example.com".into(), reason: "NO".into() };
/// assert_eq!(flow.reject(rejected), Some("alice"));
/// ```
#[derive(Debug)]
pub struct LoginFlow<'a> {
    primary: &'a str,
    fallback: Option<&'a str>,
    state: State,
}

impl<'a> LoginFlow<'a> {
    #[must_use]
    pub fn new(primary: &'a str, fallback: Option<&'a str>) -> Self {
        let fallback = fallback.filter(|f| !f.is_empty() && *f != primary);
        Self {
            primary,
            fallback,
            state: State::Primary,
        }
    }

    #[must_use]
    pub fn for_config(config: &'a ConnectionConfig) -> Self {
        Self::new(
            &config.primary_username,
            config.fallback_username.as_deref(),
        )
    }

    /// Identity to attempt now, or `None` once the flow has failed.
    #[must_use]
    pub const fn identity(&self) -> Option<&'a str> {
        match self.state {
            State::Primary => Some(self.primary),
            State::Fallback { .. } => self.fallback,
            State::Failed { .. } => None,
        }
    }

    /// Whether the current attempt is the fallback retry.
    #[must_use]
    pub const fn is_retry(&self) -> bool {
        matches!(self.state, State::Fallback { .. })
    }

    /// Record a rejection of the current identity and return the next
    /// identity to try, if any.
    pub fn reject(&mut self, error: Error) -> Option<&'a str> {
        let state = std::mem::replace(&mut self.state, State::Primary);
        self.state = match state {
            State::Primary if self.fallback.is_some() => State::Fallback {
                primary_error: error,
            },
            State::Primary => State::Failed {
                primary_error: error,
            },
            State::Fallback { primary_error } | State::Failed { primary_error } => {
                State::Failed { primary_error }
            }
        };
        self.identity()
    }

    /// The error to surface after the flow has failed: always the
    /// primary identity's rejection.
    #[must_use]
    pub fn into_error(self) -> Error {
        match self.state {
            State::Fallback { primary_error } | State::Failed { primary_error } => primary_error,
            State::Primary => Error::Auth {
                username: self.primary.to_string(),
                reason: "login was not attempted".into(),
            },
        }
    }
}

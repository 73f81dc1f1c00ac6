//! Outcome of a backup run
//!
//! Everything here is plain data, `Serialize` so a caller can render it
//! as JSON as well as text.

use crate::mailbox::{Mailbox, MessageId};
use serde::Serialize;
use std::fmt;

/// Why a message was not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SkipReason {
    /// The server answered but sent no payload.
    Empty,
    Fetch(String),
    Write(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("server returned no payload"),
            Self::Fetch(msg) | Self::Write(msg) => f.write_str(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedMessage {
    pub id: MessageId,
    pub reason: SkipReason,
}

/// Counts and failures for one mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailboxReport {
    pub mailbox: Mailbox,
    /// Messages the server listed.
    pub found: usize,
    pub saved: usize,
    pub skipped: Vec<SkippedMessage>,
    /// Set when the mailbox could not be backed up at all.
    pub error: Option<String>,
}

impl MailboxReport {
    #[must_use]
    pub const fn new(mailbox: Mailbox) -> Self {
        Self {
            mailbox,
            found: 0,
            saved: 0,
            skipped: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn skip(&mut self, id: MessageId, reason: SkipReason) {
        self.skipped.push(SkippedMessage { id, reason });
    }
}

/// Summary of one run against one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    pub server: String,
    pub account: String,
    pub mailboxes: Vec<MailboxReport>,
    /// Non-fatal problems outside any single mailbox, such as an
    /// unparseable folder listing.
    pub warnings: Vec<String>,
}

impl BackupReport {
    #[must_use]
    pub const fn new(server: String, account: String) -> Self {
        Self {
            server,
            account,
            mailboxes: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn total_saved(&self) -> usize {
        self.mailboxes.iter().map(|m| m.saved).sum()
    }

    #[must_use]
    pub fn total_skipped(&self) -> usize {
        self.mailboxes.iter().map(|m| m.skipped.len()).sum()
    }

    /// Mailboxes that could not be processed.
    pub fn failed_mailboxes(&self) -> impl Iterator<Item = &MailboxReport> {
        self.mailboxes.iter().filter(|m| m.error.is_some())
    }
}

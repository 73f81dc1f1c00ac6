//! Mailbox and message identifier types
//!
//! A [`Mailbox`] is a server-side folder name. IMAP servers report any
//! number of them; POP3 exposes a single implicit `INBOX`. A
//! [`MessageId`] addresses one message inside the currently selected
//! mailbox and is only meaningful for the lifetime of that selection.

use serde::Serialize;
use std::fmt;

/// A server-side mailbox folder.
///
/// # Examples
///
/// ```
/// use mail_backup::Mailbox;
///
/// let inbox = Mailbox::inbox();
/// assert_eq!(inbox.as_str(), "INBOX");
///
/// let nested = Mailbox::new("INBOX/Work");
/// assert_eq!(nested.path_component(), "INBOX_Work");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Mailbox(String);

impl Mailbox {
    /// The name POP3 uses for its only mailbox.
    pub const INBOX: &'static str = "INBOX";

    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn inbox() -> Self {
        Self::new(Self::INBOX)
    }

    /// The mailbox name exactly as the server reported it.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the INBOX (case-insensitive, RFC 3501).
    #[must_use]
    pub fn is_inbox(&self) -> bool {
        self.0.eq_ignore_ascii_case(Self::INBOX)
    }

    /// The name made safe for use as a single path component.
    ///
    /// Hierarchy delimiters and other path separators become `_`.
    #[must_use]
    pub fn path_component(&self) -> String {
        let name: String = self
            .0
            .chars()
            .map(|c| match c {
                '/' | '\\' | '\0' => '_',
                other => other,
            })
            .collect();
        match name.as_str() {
            "" | "." | ".." => name.replace('.', "_") + "_",
            _ => name,
        }
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Mailbox {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Mailbox {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Protocol-native handle for one message in the selected mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Opaque token from an IMAP `SEARCH` reply.
    Imap(String),
    /// 1-based POP3 message number.
    Pop3(u32),
}

impl MessageId {
    /// Token form used in protocol commands and as the eml file stem.
    #[must_use]
    pub fn token(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Imap(token) => f.write_str(token),
            Self::Pop3(n) => write!(f, "{n}"),
        }
    }
}

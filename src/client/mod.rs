//! Mail protocol clients
//!
//! [`MailClient`] is the capability set the backup run needs from an
//! authenticated session. [`ImapClient`] and [`Pop3Client`] implement
//! it; POP3 answers the mailbox questions with its single `INBOX`.

mod imap;
mod pop3;

pub use imap::ImapClient;
pub use pop3::Pop3Client;

use crate::error::Result;
use crate::mailbox::{Mailbox, MessageId};

/// Whether a session's stream still lines up with the commands sent on
/// it. A command abandoned mid-response (timeout, transport failure)
/// leaves the rest of its reply on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum SessionState {
    #[default]
    Ready,
    /// Reconnect before the next command.
    NeedsReconnect,
    /// Reconnecting failed; every further command fails with this reason.
    Lost(String),
}

impl SessionState {
    fn desync(&mut self) {
        if *self == Self::Ready {
            *self = Self::NeedsReconnect;
        }
    }

    /// `Ok(true)` if a reconnect is due, the recorded reason if the
    /// session is gone for good.
    fn needs_reconnect(&self) -> std::result::Result<bool, String> {
        match self {
            Self::Ready => Ok(false),
            Self::NeedsReconnect => Ok(true),
            Self::Lost(reason) => Err(reason.clone()),
        }
    }
}

/// An authenticated mail session.
///
/// Calls are strictly sequential; implementations are not expected to
/// multiplex requests.
#[allow(async_fn_in_trait)]
pub trait MailClient: Sized {
    /// Every mailbox on the account.
    ///
    /// A malformed or failed listing yields an empty list plus a warning
    /// in the returned vector, never an error.
    async fn list_mailboxes(&mut self) -> (Vec<Mailbox>, Vec<String>);

    /// Make `mailbox` the target of subsequent enumeration and fetches.
    async fn select_mailbox(&mut self, mailbox: &Mailbox) -> Result<()>;

    /// Every message currently visible in the selected mailbox.
    async fn list_message_ids(&mut self) -> Result<Vec<MessageId>>;

    /// Fetch one message. `Ok(None)` means the server answered
    /// successfully but sent no payload.
    async fn fetch_message(&mut self, id: &MessageId) -> Result<Option<Vec<u8>>>;

    /// Log out. Failures are logged, never returned.
    async fn close(self);
}

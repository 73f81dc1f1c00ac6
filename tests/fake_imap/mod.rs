//! Fake IMAP server for integration testing
//!
//! An in-process IMAPS server that speaks enough of the protocol to
//! run a full backup against it:
//!
//! TCP -> TLS handshake -> greeting -> LOGIN -> LIST/SELECT/SEARCH/FETCH -> LOGOUT
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, TLS setup, and command dispatch
//! - `handlers/` -- one file per IMAP command
//! - `mailbox` -- test data model (accounts, folders, emails, builder)
//! - `io` -- shared write helpers

mod handlers;
mod server;

pub use mailbox::{LoginAttempt, MailboxBuilder};
pub use server::FakeImapServer;

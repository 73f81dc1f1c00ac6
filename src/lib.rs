//! Mail account backup library
//!
//! Retrieves every message of an account over IMAP or POP3 (implicit
//! TLS) and stores the raw messages locally, either as size-bounded
//! rotating mbox archives or as one `.eml` file per message.
//!
//! The entry point is [`run_backup`], which returns a [`BackupReport`]
//! describing what was saved and what was skipped. The crate itself
//! never prints; progress and failures go through `tracing`.

mod auth;
mod backup;
mod client;
mod config;
mod connection;
mod error;
mod mailbox;
mod report;
mod saver;

pub use auth::LoginFlow;
pub use backup::{Backup, run_backup};
pub use client::{ImapClient, MailClient, Pop3Client};
pub use config::{ConnectionConfig, DEFAULT_MAX_CHUNK_SIZE, Protocol, SaverKind, StorageConfig, mib_to_bytes};
pub use error::{Error, Result};
pub use mailbox::{Mailbox, MessageId};
pub use report::{BackupReport, MailboxReport, SkipReason, SkippedMessage};
pub use saver::{EmlSaver, MboxSaver, Saver, sanitize_identifier};

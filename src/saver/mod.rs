//! Local persistence of fetched messages
//!
//! A [`Saver`] is opened per mailbox and is one of two strategies:
//! rotating mbox chunks or one `.eml` file per message.

mod eml;
mod mbox;

pub use eml::{EmlSaver, sanitize_identifier};
pub use mbox::MboxSaver;

use crate::config::{SaverKind, StorageConfig};
use crate::error::Result;
use crate::mailbox::Mailbox;

/// The configured storage strategy for one mailbox.
#[derive(Debug)]
pub enum Saver {
    Mbox(MboxSaver),
    Eml(EmlSaver),
}

impl Saver {
    /// Open the saver `storage` selects for `account`'s `mailbox`.
    ///
    /// Nothing is created on disk until a message is added.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Write`](crate::Error::Write) if existing mbox
    /// chunks cannot be inspected.
    pub fn open(storage: &StorageConfig, account: &str, mailbox: &Mailbox) -> Result<Self> {
        Ok(match storage.kind {
            SaverKind::Mbox => Self::Mbox(MboxSaver::new(
                &storage.output_dir,
                account,
                mailbox,
                storage.max_chunk_size,
            )?),
            SaverKind::Eml => Self::Eml(EmlSaver::new(&storage.output_dir, account, mailbox)),
        })
    }

    /// Persist one raw message. `identifier` names the file in eml mode
    /// and is ignored by mbox.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Write`](crate::Error::Write) if the message
    /// cannot be stored.
    pub fn add(&mut self, raw: &[u8], identifier: &str) -> Result<()> {
        match self {
            Self::Mbox(saver) => saver.add(raw),
            Self::Eml(saver) => saver.add(raw, identifier),
        }
    }

    /// Flush and release. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Write`](crate::Error::Write) if buffered data
    /// may not have reached the disk.
    pub fn close(&mut self) -> Result<()> {
        match self {
            Self::Mbox(saver) => saver.close(),
            Self::Eml(saver) => saver.close(),
        }
    }
}

//! One `.eml` file per message under `{account}/{mailbox}/`.

use crate::error::{Error, Result};
use crate::mailbox::Mailbox;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Keep alphanumerics, `-`, `_` and `.`; drop everything else.
///
/// ```
/// assert_eq!(mail_backup::sanitize_identifier("<12/34>"), "1234");
/// ```
#[must_use]
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect()
}

/// Per-message writer. Holds no state between calls beyond its
/// directory.
///
/// Identifiers that sanitize to the same token overwrite each other;
/// protocol ids are unique within a mailbox so this does not happen in
/// a single run.
#[derive(Debug)]
pub struct EmlSaver {
    dir: PathBuf,
}

impl EmlSaver {
    #[must_use]
    pub fn new(output_dir: &Path, account: &str, mailbox: &Mailbox) -> Self {
        Self {
            dir: output_dir.join(account).join(mailbox.path_component()),
        }
    }

    /// Path a message with `identifier` is written to.
    #[must_use]
    pub fn message_path(&self, identifier: &str) -> PathBuf {
        let mut token = sanitize_identifier(identifier);
        if token.is_empty() || token.chars().all(|c| c == '.') {
            token = "unnamed".into();
        }
        self.dir.join(format!("{token}.eml"))
    }

    /// Write one message. Empty payloads are ignored; the directory is
    /// created on the first message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Write`] if the directory or file cannot be
    /// created or written.
    pub fn add(&mut self, raw: &[u8], identifier: &str) -> Result<()> {
        if raw.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir).map_err(|e| Error::write(&self.dir, e))?;

        let path = self.message_path(identifier);
        File::create(&path)
            .and_then(|mut f| {
                f.write_all(raw)?;
                f.sync_data()
            })
            .map_err(|e| Error::write(&path, e))?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    /// Nothing is held open between messages.
    ///
    /// # Errors
    ///
    /// Never fails; the signature matches [`MboxSaver::close`](super::MboxSaver::close).
    #[allow(clippy::unnecessary_wraps, clippy::unused_self)]
    pub const fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

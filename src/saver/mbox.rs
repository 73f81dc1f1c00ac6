//! Size-bounded rotating mbox archives
//!
//! Messages for one mailbox go to `{account}.{mailbox}.{n}.mbox`,
//! starting at `n = 1`. A chunk is rotated before a message would push
//! its payload total past the budget, except that an empty chunk always
//! takes one message whatever its size. Re-opening resumes at the first
//! chunk that is missing or still under budget, with the size counter
//! taken from the file on disk.

use crate::error::{Error, Result};
use crate::mailbox::Mailbox;
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Append-only storage under a chunk that can be cut back to an
/// earlier length.
trait RecordSink: Write {
    fn stored_len(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl RecordSink for File {
    fn stored_len(&self) -> io::Result<u64> {
        self.metadata().map(|m| m.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Write `record` durably. On failure the sink is cut back to its
/// previous length, so the archive still ends on a record boundary.
fn append_record(sink: &mut impl RecordSink, record: &[u8]) -> io::Result<()> {
    let before = sink.stored_len()?;
    let written = sink.write_all(record).and_then(|()| sink.sync());
    if let Err(e) = written {
        if let Err(undo) = sink.truncate(before) {
            warn!("Could not remove partial mbox record: {}", undo);
        }
        return Err(e);
    }
    Ok(())
}

/// The chunk file currently held open (and locked) by a saver.
#[derive(Debug)]
struct OpenChunk {
    path: PathBuf,
    file: File,
}

impl OpenChunk {
    fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::write(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::write(&path, e))?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(Error::write(
                    &path,
                    io::Error::new(
                        io::ErrorKind::WouldBlock,
                        "archive is locked by another process",
                    ),
                ));
            }
            Err(TryLockError::Error(e)) => return Err(Error::write(&path, e)),
        }

        Ok(Self { path, file })
    }

    fn len(&self) -> Result<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| Error::write(&self.path, e))
    }

    /// Flush to disk and release the lock. The lock is released even
    /// when the flush fails.
    fn close(self) -> Result<()> {
        let synced = self.file.sync_all();
        let unlocked = self.file.unlock();
        synced
            .and(unlocked)
            .map_err(|e| Error::write(&self.path, e))
    }
}

/// Chunked mbox writer scoped to one mailbox.
#[derive(Debug)]
pub struct MboxSaver {
    dir: PathBuf,
    stem: String,
    max_size: u64,
    chunk: u32,
    size: u64,
    current: Option<OpenChunk>,
    /// First failure to close a chunk on rotation, reported by `close`.
    rotation_error: Option<Error>,
}

impl MboxSaver {
    /// Prepare a saver for `mailbox`, resuming any earlier run's chunks.
    ///
    /// No file is created until the first message arrives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Write`] if an existing chunk cannot be inspected.
    pub fn new(
        dir: impl Into<PathBuf>,
        account: &str,
        mailbox: &Mailbox,
        max_size: u64,
    ) -> Result<Self> {
        let mut saver = Self {
            dir: dir.into(),
            stem: format!("{account}.{}", mailbox.path_component()),
            max_size,
            chunk: 1,
            size: 0,
            current: None,
            rotation_error: None,
        };
        saver.seek_open_chunk()?;
        Ok(saver)
    }

    /// Index of the chunk the next message goes to (barring rotation).
    #[must_use]
    pub const fn chunk(&self) -> u32 {
        self.chunk
    }

    /// Payload bytes accounted to the current chunk.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Path of chunk `n`.
    #[must_use]
    pub fn chunk_path(&self, n: u32) -> PathBuf {
        self.dir.join(format!("{}.{n}.mbox", self.stem))
    }

    /// Advance from the current index to the first chunk that does not
    /// exist or is still under budget, and load its size.
    fn seek_open_chunk(&mut self) -> Result<()> {
        loop {
            let path = self.chunk_path(self.chunk);
            match fs::metadata(&path) {
                Ok(meta) if meta.len() >= self.max_size => {
                    debug!("{} is full, skipping", path.display());
                    self.chunk += 1;
                }
                Ok(meta) => {
                    self.size = meta.len();
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    self.size = 0;
                    return Ok(());
                }
                Err(e) => return Err(Error::write(path, e)),
            }
        }
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(full) = self.current.take()
            && let Err(e) = full.close()
        {
            warn!("Closing full chunk failed: {}", e);
            if self.rotation_error.is_none() {
                self.rotation_error = Some(e);
            }
        }
        self.chunk += 1;
        self.seek_open_chunk()?;
        info!("Rotated to {}", self.chunk_path(self.chunk).display());
        Ok(())
    }

    /// Append one message, rotating first if it would overflow a
    /// non-empty chunk. Empty payloads are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Write`] if the chunk cannot be opened, locked or
    /// written. A failed write leaves no partial record behind.
    pub fn add(&mut self, raw: &[u8]) -> Result<()> {
        if raw.is_empty() {
            return Ok(());
        }
        let len = raw.len() as u64;

        if self.size > 0 && self.size.saturating_add(len) > self.max_size {
            self.rotate()?;
        }

        if self.current.is_none() {
            let chunk = OpenChunk::open(self.chunk_path(self.chunk))?;
            self.size = chunk.len()?;
            debug!("Opened {}", chunk.path.display());
            self.current = Some(chunk);
        }
        let Some(chunk) = self.current.as_mut() else {
            return Ok(());
        };

        let record = frame(raw, Utc::now());
        append_record(&mut chunk.file, &record).map_err(|e| Error::write(&chunk.path, e))?;

        self.size += len;
        Ok(())
    }

    /// Flush and unlock the current chunk. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Write`] if the current chunk cannot be synced or
    /// unlocked, or if closing a full chunk failed on an earlier
    /// rotation. Each failure is reported once.
    pub fn close(&mut self) -> Result<()> {
        let closed = self.current.take().map_or(Ok(()), OpenChunk::close);
        let Some(earlier) = self.rotation_error.take() else {
            return closed;
        };
        if let Err(e) = closed {
            warn!("Closing mbox chunk failed: {}", e);
        }
        Err(earlier)
    }
}

impl Drop for MboxSaver {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Closing mbox chunk failed: {}", e);
        }
    }
}

/// Encode one message as an mbox record.
///
/// The record starts with a `From ` marker line: the message's own
/// envelope line when it has one, otherwise a `MAILER-DAEMON` line
/// stamped with `received`. Line endings become LF, body lines starting
/// with `From ` are escaped as `>From `, and a blank line ends the
/// record.
fn frame(raw: &[u8], received: DateTime<Utc>) -> Vec<u8> {
    let mut lines = raw.split(|b| *b == b'\n').peekable();
    let mut out = Vec::with_capacity(raw.len() + 64);

    match lines.peek() {
        Some(&first) if first.starts_with(b"From ") => {
            out.extend_from_slice(first.strip_suffix(b"\r").unwrap_or(first));
            lines.next();
        }
        _ => {
            let stamp = received.format("%a %b %e %H:%M:%S %Y");
            out.extend_from_slice(format!("From MAILER-DAEMON {stamp}").as_bytes());
        }
    }
    out.push(b'\n');

    let mut lines: Vec<&[u8]> = lines.collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    for line in lines {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.starts_with(b"From ") {
            out.push(b'>');
        }
        out.extend_from_slice(line);
        out.push(b'\n');
    }
    out.push(b'\n');
    out
}

//! FETCH command handler.
//!
//! Message bodies travel as counted literals: `{length}\r\n` followed
//! by exactly that many raw bytes, then the closing `)`:
//!
//! ```text
//! * 2 FETCH (RFC822 {1234}
//! <1234 bytes of raw RFC 5322 message>
//! )
//! ```
//!
//! A message slot without a body is answered with flags only, so the
//! client sees a successful FETCH that carries no message. A slow slot
//! sleeps before answering.

use crate::fake_imap::io::{write_bytes, write_line};
use crate::fake_imap::mailbox::Mailbox;
use imap_codec::imap_types::sequence::{SeqOrUid, Sequence, SequenceSet};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Sequence numbers named by single values in `seq_set`. Ranges are
/// not used by the backup client.
fn sequence_numbers(seq_set: &SequenceSet) -> Vec<u32> {
    seq_set
        .0
        .as_ref()
        .iter()
        .filter_map(|seq| match seq {
            Sequence::Single(SeqOrUid::Value(v)) => Some(v.get()),
            _ => None,
        })
        .collect()
}

async fn write_message<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    seq: u32,
    raw: &[u8],
) -> std::io::Result<()> {
    let header = format!("* {seq} FETCH (RFC822 {{{}}}\r\n", raw.len());
    write_line(stream, &header).await?;
    write_bytes(stream, raw).await?;
    write_line(stream, ")\r\n").await
}

/// Handle the FETCH command (sequence-number form).
pub async fn handle_fetch<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    sequence_set: &SequenceSet,
    mailbox: &Mailbox,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder) = selected_folder.and_then(|name| mailbox.get_folder(name)) else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    for seq in sequence_numbers(sequence_set) {
        let Some(email) = (seq as usize)
            .checked_sub(1)
            .and_then(|idx| folder.emails.get(idx))
        else {
            continue;
        };

        if let Some(delay) = email.delay {
            tokio::time::sleep(delay).await;
        }
        let written = match &email.raw {
            Some(raw) => write_message(stream, seq, raw).await,
            None => write_line(stream, &format!("* {seq} FETCH (FLAGS (\\Seen))\r\n")).await,
        };
        if written.is_err() {
            return;
        }
    }

    let resp = format!("{tag} OK FETCH completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::io::drain;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use std::num::NonZeroU32;
    use tokio::io::BufReader;

    fn single(n: u32) -> SequenceSet {
        SequenceSet(
            vec![Sequence::Single(SeqOrUid::Value(NonZeroU32::new(n).unwrap()))]
                .try_into()
                .unwrap(),
        )
    }

    async fn run(tag: &str, seq: u32, mailbox: &Mailbox) -> String {
        let (client, server) = tokio::io::duplex(8192);
        let mut stream = BufReader::new(server);

        handle_fetch(tag, &single(seq), mailbox, Some("INBOX"), &mut stream).await;
        drop(stream);

        drain(client).await
    }

    fn mailbox() -> Mailbox {
        MailboxBuilder::new()
            .folder("INBOX")
            .email(b"Subject: one\r\n\r\nbody")
            .missing_email()
            .build()
    }

    #[tokio::test]
    async fn sends_body_as_literal() {
        let output = run("A8", 1, &mailbox()).await;
        assert_eq!(
            output,
            "* 1 FETCH (RFC822 {20}\r\nSubject: one\r\n\r\nbody)\r\nA8 OK FETCH completed\r\n"
        );
    }

    #[tokio::test]
    async fn missing_body_sends_flags_only() {
        let output = run("A9", 2, &mailbox()).await;
        assert_eq!(
            output,
            "* 2 FETCH (FLAGS (\\Seen))\r\nA9 OK FETCH completed\r\n"
        );
    }

    #[tokio::test]
    async fn unknown_sequence_number_returns_only_ok() {
        let output = run("A10", 7, &mailbox()).await;
        assert_eq!(output, "A10 OK FETCH completed\r\n");
    }
}

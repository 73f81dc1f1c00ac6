//! LOGIN command handler.
//!
//! Credentials are checked against the configured accounts. A rejected
//! LOGIN answers `NO` and leaves the connection open, so the client may
//! retry on the same session:
//!
//! ```text
//! A0001 LOGIN "alice@example.com" "secret"
//! A0001 NO [AUTHENTICATIONFAILED] Invalid credentials
//! A0002 LOGIN "alice" "secret"
//! A0002 OK LOGIN completed
//! ```

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::{LoginAttempt, Mailbox};
use std::iter::Peekable;
use std::str::Chars;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Split the arguments of a raw `LOGIN` line into username and
/// password. Handles atoms and quoted strings with `\` escapes.
pub fn login_arguments(line: &str) -> Option<(String, String)> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut words = line.splitn(3, ' ');
    words.next()?;
    if !words.next()?.eq_ignore_ascii_case("LOGIN") {
        return None;
    }
    let mut chars = words.next()?.chars().peekable();
    let username = next_astring(&mut chars)?;
    let password = next_astring(&mut chars)?;
    Some((username, password))
}

fn next_astring(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    while chars.peek() == Some(&' ') {
        chars.next();
    }
    let mut out = String::new();
    if chars.peek()? == &'"' {
        chars.next();
        loop {
            match chars.next()? {
                '\\' => out.push(chars.next()?),
                '"' => return Some(out),
                c => out.push(c),
            }
        }
    }
    while let Some(&c) = chars.peek() {
        if c == ' ' {
            break;
        }
        out.push(c);
        chars.next();
    }
    (!out.is_empty()).then_some(out)
}

/// Handle the LOGIN command. Returns `Some(accepted)`, or `None` if the
/// response could not be written.
pub async fn handle_login<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    line: &str,
    mailbox: &Mailbox,
    attempts: &Mutex<Vec<LoginAttempt>>,
    stream: &mut BufReader<S>,
) -> Option<bool> {
    let Some((username, password)) = login_arguments(line) else {
        let resp = format!("{tag} BAD Malformed LOGIN\r\n");
        write_line(stream, &resp).await.ok()?;
        return Some(false);
    };

    let accepted = mailbox.accepts(&username, &password);
    attempts.lock().unwrap().push(LoginAttempt { username, accepted });

    let resp = if accepted {
        format!("{tag} OK LOGIN completed\r\n")
    } else {
        format!("{tag} NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
    };
    write_line(stream, &resp).await.ok()?;
    Some(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::io::drain;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::BufReader;

    async fn run(line: &str, mailbox: &Mailbox) -> (String, Option<bool>, Vec<LoginAttempt>) {
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);
        let attempts = Mutex::new(Vec::new());

        let tag = line.split(' ').next().unwrap();
        let accepted = handle_login(tag, line, mailbox, &attempts, &mut stream).await;
        drop(stream);

        (drain(client).await, accepted, attempts.into_inner().unwrap())
    }

    #[test]
    fn parses_quoted_and_atom_arguments() {
        assert_eq!(
            login_arguments("A1 LOGIN \"alice@example.com\" \"se\\\"cret\"\r\n"),
            Some(("alice@example.com".into(), "se\"cret".into()))
        );
        assert_eq!(
            login_arguments("A1 login alice secret\r\n"),
            Some(("alice".into(), "secret".into()))
        );
        assert_eq!(login_arguments("A1 LOGIN alice\r\n"), None);
        assert_eq!(login_arguments("A1 SELECT INBOX\r\n"), None);
    }

    #[tokio::test]
    async fn accepts_known_account() {
        let mailbox = MailboxBuilder::new().account("alice", "secret").build();
        let (output, accepted, attempts) =
            run("A0001 LOGIN \"alice\" \"secret\"\r\n", &mailbox).await;

        assert_eq!(accepted, Some(true));
        assert_eq!(output, "A0001 OK LOGIN completed\r\n");
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].accepted);
    }

    #[tokio::test]
    async fn rejects_wrong_credentials() {
        let mailbox = MailboxBuilder::new().account("alice", "secret").build();
        let (output, accepted, attempts) =
            run("A0001 LOGIN \"alice@example.com\" \"secret\"\r\n", &mailbox).await;

        assert_eq!(accepted, Some(false));
        assert!(output.starts_with("A0001 NO "));
        assert_eq!(attempts[0].username, "alice@example.com");
        assert!(!attempts[0].accepted);
    }

    #[tokio::test]
    async fn open_server_accepts_anyone() {
        let mailbox = MailboxBuilder::new().build();
        let (_, accepted, _) = run("T1 LOGIN \"bob\" \"x\"\r\n", &mailbox).await;
        assert_eq!(accepted, Some(true));
    }
}

//! POP3 client over implicit TLS: greeting, USER/PASS, LIST, RETR, QUIT.

use super::{MailClient, SessionState};
use crate::auth::LoginFlow;
use crate::config::ConnectionConfig;
use crate::connection::{self, MailStream, with_timeout};
use crate::error::{Error, Result};
use crate::mailbox::{Mailbox, MessageId};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// One status line from the server (`+OK ...` or `-ERR ...`).
#[derive(Debug)]
struct Reply {
    ok: bool,
    text: String,
}

impl Reply {
    fn parse(line: &str) -> Self {
        Self {
            ok: line.starts_with("+OK"),
            text: line.to_string(),
        }
    }
}

async fn read_line<S>(stream: &mut BufReader<S>) -> io::Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut line = Vec::new();
    let n = stream.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed",
        ));
    }
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    Ok(line)
}

async fn read_status<S>(stream: &mut BufReader<S>) -> io::Result<Reply>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = read_line(stream).await?;
    Ok(Reply::parse(&String::from_utf8_lossy(&line)))
}

async fn send<S>(stream: &mut BufReader<S>, command: &str) -> io::Result<Reply>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let inner = stream.get_mut();
    inner.write_all(command.as_bytes()).await?;
    inner.write_all(b"\r\n").await?;
    inner.flush().await?;
    read_status(stream).await
}

/// Read a multi-line body up to the lone `.` terminator, undoing
/// dot-stuffing. Lines are rejoined with CRLF.
async fn read_multiline<S>(stream: &mut BufReader<S>) -> io::Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut out = Vec::new();
    loop {
        let line = read_line(stream).await?;
        if line == b"." {
            break;
        }
        let content = line.strip_prefix(b".").unwrap_or(&line);
        out.extend_from_slice(content);
        out.extend_from_slice(b"\r\n");
    }
    Ok(out)
}

/// Send a command with a multi-line answer. `Ok(Err(text))` is a clean
/// `-ERR` reply; an IO error leaves the stream mid-response.
async fn multiline_command<S>(
    stream: &mut BufReader<S>,
    command: &str,
) -> io::Result<std::result::Result<Vec<u8>, String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reply = send(stream, command).await?;
    if !reply.ok {
        return Ok(Err(reply.text));
    }
    read_multiline(stream).await.map(Ok)
}

/// Message numbers from a `LIST` body (`<n> <octets>` per line).
fn parse_listing(body: &[u8]) -> Vec<u32> {
    String::from_utf8_lossy(body)
        .lines()
        .filter_map(|line| line.split_whitespace().next()?.parse().ok())
        .filter(|n| *n > 0)
        .collect()
}

/// A connected but not yet authenticated POP3 session.
pub struct Pop3Connection {
    stream: BufReader<MailStream>,
    server: String,
    timeout: Duration,
}

impl Pop3Connection {
    /// Open the TLS connection and read the server greeting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the connection or greeting fails or
    /// times out, or if the greeting is not `+OK`.
    pub async fn open(config: &ConnectionConfig) -> Result<Self> {
        let server = config.server();
        let stream = connection::open(config).await?;
        let mut stream = BufReader::new(stream);

        let connect_error = |reason: String| Error::Connect {
            server: server.clone(),
            reason,
        };
        let greeting = with_timeout(
            config.timeout,
            async {
                read_status(&mut stream)
                    .await
                    .map_err(|e| connect_error(format!("no greeting: {e}")))
            },
            || connect_error("timed out waiting for greeting".into()),
        )
        .await?;
        if !greeting.ok {
            return Err(connect_error(format!("rejected: {}", greeting.text)));
        }

        debug!("Connected to POP3 server {}", server);
        Ok(Self {
            stream,
            server,
            timeout: config.timeout,
        })
    }

    async fn authenticate(&mut self, username: &str, password: &str) -> Result<()> {
        let auth_error = |reason: String| Error::Auth {
            username: username.to_string(),
            reason,
        };
        let stream = &mut self.stream;
        with_timeout(
            self.timeout,
            async {
                let reply = send(stream, &format!("USER {username}"))
                    .await
                    .map_err(|e| auth_error(e.to_string()))?;
                if !reply.ok {
                    return Err(auth_error(reply.text));
                }
                let reply = send(stream, &format!("PASS {password}"))
                    .await
                    .map_err(|e| auth_error(e.to_string()))?;
                if reply.ok {
                    Ok(())
                } else {
                    Err(auth_error(reply.text))
                }
            },
            || auth_error(format!("timed out after {}s", self.timeout.as_secs())),
        )
        .await
    }

    async fn quit(&mut self) {
        match tokio::time::timeout(self.timeout, send(&mut self.stream, "QUIT")).await {
            Ok(Ok(_)) => debug!("Sent QUIT to {}", self.server),
            Ok(Err(e)) => warn!("QUIT to {} failed: {}", self.server, e),
            Err(_) => warn!("QUIT to {} timed out", self.server),
        }
    }

    /// Authenticate. A rejected USER/PASS leaves the session unusable on
    /// many servers, so the fallback identity gets a fresh connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] naming the primary identity if every
    /// identity is rejected, or the [`Error::Connect`] of a failed
    /// reconnect when it is the only failure.
    pub async fn login(self, config: &ConnectionConfig) -> Result<Pop3Client> {
        let mut flow = LoginFlow::for_config(config);
        let mut pending = Some(self);

        while let Some(username) = flow.identity() {
            let mut conn = match pending.take() {
                Some(conn) => conn,
                None => {
                    info!(
                        "Retrying login on {} with username '{}'",
                        config.server(),
                        username
                    );
                    match Self::open(config).await {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!("Reconnect for login retry failed: {}", e);
                            flow.reject(e);
                            continue;
                        }
                    }
                }
            };

            match conn.authenticate(username, &config.password).await {
                Ok(()) => {
                    info!("Logged in to {} as '{}'", conn.server, username);
                    return Ok(Pop3Client {
                        conn,
                        config: config.clone(),
                        selected: false,
                        state: SessionState::Ready,
                    });
                }
                Err(e) => {
                    warn!("Login with username '{}' failed: {}", username, e);
                    conn.quit().await;
                    flow.reject(e);
                }
            }
        }

        Err(flow.into_error())
    }
}

/// Outcome of one multi-line command on the session.
enum Exchange {
    Body(Vec<u8>),
    /// The server answered `-ERR`.
    Refused(String),
    /// The exchange broke off mid-response.
    Broken(String),
}

/// Authenticated POP3 session used for the backup run.
///
/// A command that times out or fails on the transport leaves unread
/// reply lines behind; the next command first replaces the connection
/// with a fresh, logged-in one. Message numbers stay valid across
/// sessions since nothing is ever deleted.
pub struct Pop3Client {
    conn: Pop3Connection,
    config: ConnectionConfig,
    selected: bool,
    state: SessionState,
}

impl Pop3Client {
    /// Connect and log in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the server cannot be reached and
    /// [`Error::Auth`] if every identity is rejected.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        Pop3Connection::open(config).await?.login(config).await
    }

    /// Swap in a fresh connection if the current one is out of sync.
    async fn ensure_in_sync(&mut self) -> std::result::Result<(), String> {
        if !self.state.needs_reconnect()? {
            return Ok(());
        }
        info!("Reconnecting to {}", self.conn.server);
        match Self::connect(&self.config).await {
            Ok(fresh) => {
                self.conn = fresh.conn;
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                warn!("Reconnect to {} failed: {}", self.conn.server, reason);
                self.state = SessionState::Lost(reason.clone());
                Err(reason)
            }
        }
    }

    async fn exchange(&mut self, command: &str) -> Exchange {
        let limit = self.conn.timeout;
        let outcome =
            tokio::time::timeout(limit, multiline_command(&mut self.conn.stream, command)).await;
        match outcome {
            Ok(Ok(Ok(body))) => Exchange::Body(body),
            Ok(Ok(Err(text))) => Exchange::Refused(text),
            Ok(Err(e)) => {
                warn!("{}: session out of sync", self.conn.server);
                self.state.desync();
                Exchange::Broken(e.to_string())
            }
            Err(_) => {
                warn!("{}: session out of sync", self.conn.server);
                self.state.desync();
                Exchange::Broken(format!("timed out after {}s", limit.as_secs()))
            }
        }
    }
}

impl MailClient for Pop3Client {
    async fn list_mailboxes(&mut self) -> (Vec<Mailbox>, Vec<String>) {
        (vec![Mailbox::inbox()], Vec::new())
    }

    async fn select_mailbox(&mut self, mailbox: &Mailbox) -> Result<()> {
        if mailbox.is_inbox() {
            self.selected = true;
            Ok(())
        } else {
            Err(Error::Mailbox {
                mailbox: mailbox.to_string(),
                reason: "POP3 only provides INBOX".into(),
            })
        }
    }

    async fn list_message_ids(&mut self) -> Result<Vec<MessageId>> {
        let mailbox_error = |reason: String| Error::Mailbox {
            mailbox: Mailbox::INBOX.into(),
            reason,
        };
        if !self.selected {
            return Err(mailbox_error("no mailbox selected".into()));
        }
        self.ensure_in_sync()
            .await
            .map_err(|reason| mailbox_error(format!("session lost: {reason}")))?;

        let body = match self.exchange("LIST").await {
            Exchange::Body(body) => body,
            Exchange::Refused(reason) | Exchange::Broken(reason) => {
                return Err(mailbox_error(format!("LIST failed: {reason}")));
            }
        };

        let ids: Vec<MessageId> = parse_listing(&body)
            .into_iter()
            .map(MessageId::Pop3)
            .collect();
        debug!("{}: INBOX: {} messages found", self.conn.server, ids.len());
        Ok(ids)
    }

    async fn fetch_message(&mut self, id: &MessageId) -> Result<Option<Vec<u8>>> {
        let fetch_error = |reason: String| Error::Fetch {
            mailbox: Mailbox::INBOX.into(),
            id: id.token(),
            reason,
        };
        let MessageId::Pop3(number) = id else {
            return Err(fetch_error("not a POP3 message number".into()));
        };
        self.ensure_in_sync()
            .await
            .map_err(|reason| fetch_error(format!("session lost: {reason}")))?;
        debug!("{}: INBOX: Fetching {}", self.conn.server, number);

        match self.exchange(&format!("RETR {number}")).await {
            Exchange::Body(body) => Ok(Some(body).filter(|b| !b.is_empty())),
            Exchange::Refused(reason) => Err(fetch_error(reason)),
            Exchange::Broken(reason) => Err(fetch_error(format!("RETR failed: {reason}"))),
        }
    }

    async fn close(mut self) {
        if self.state == SessionState::Ready {
            self.conn.quit().await;
        } else {
            debug!(
                "Dropping out-of-sync session to {} without QUIT",
                self.conn.server
            );
        }
    }
}

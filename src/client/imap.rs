//! IMAP client over implicit TLS

use super::{MailClient, SessionState};
use crate::auth::LoginFlow;
use crate::config::ConnectionConfig;
use crate::connection::{self, MailStream, with_timeout};
use crate::error::{Error, Result};
use crate::mailbox::{Mailbox, MessageId};
use async_imap::error::{Error as ImapError, Result as ImapResult};
use async_imap::types::{Fetch, Name};
use async_imap::{Client, Session};
use futures::TryStreamExt;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info, warn};

type ImapStream = Compat<MailStream>;
type ImapSession = Session<ImapStream>;

const MAX_GREETING_LEN: usize = 4096;

/// Read the untagged greeting line byte by byte, so nothing past it is
/// consumed before the stream is handed to the IMAP client.
async fn read_greeting<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<String> {
    let mut line = Vec::new();
    loop {
        let byte = stream.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        if line.len() >= MAX_GREETING_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "greeting line too long",
            ));
        }
        line.push(byte);
    }
    Ok(String::from_utf8_lossy(&line).trim_end().to_string())
}

/// Why an IMAP command did not complete.
struct Failure {
    reason: String,
    /// The command was abandoned before its tagged reply was read.
    desynced: bool,
}

/// Run one IMAP command under the step timeout.
///
/// A tagged `NO`/`BAD` ends the command cleanly. A timeout or any
/// transport or parse failure leaves an unknown part of the reply on
/// the wire.
async fn bounded<T>(
    limit: Duration,
    command: impl Future<Output = ImapResult<T>>,
) -> std::result::Result<T, Failure> {
    match tokio::time::timeout(limit, command).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Failure {
            desynced: !matches!(e, ImapError::No(_) | ImapError::Bad(_)),
            reason: e.to_string(),
        }),
        Err(_) => Err(Failure {
            reason: format!("timed out after {}s", limit.as_secs()),
            desynced: true,
        }),
    }
}

/// A connected but not yet authenticated IMAP session.
pub struct ImapConnection {
    client: Client<ImapStream>,
    server: String,
}

impl ImapConnection {
    /// Open the TLS connection to the server and consume its greeting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the TCP connect, TLS handshake or
    /// greeting fails or times out, or if the server rejects the
    /// connection in its greeting.
    pub async fn open(config: &ConnectionConfig) -> Result<Self> {
        let server = config.server();
        let mut stream = connection::open(config).await?;

        let connect_error = |reason: String| Error::Connect {
            server: server.clone(),
            reason,
        };
        let greeting = with_timeout(
            config.timeout,
            async {
                read_greeting(&mut stream)
                    .await
                    .map_err(|e| connect_error(format!("no greeting: {e}")))
            },
            || connect_error("timed out waiting for greeting".into()),
        )
        .await?;
        if !(greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH")) {
            return Err(connect_error(format!("rejected: {greeting}")));
        }

        debug!("Connected to IMAP server {}", server);
        Ok(Self {
            client: Client::new(stream.compat()),
            server,
        })
    }

    /// Authenticate, retrying once with the fallback identity on the
    /// same connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] naming the primary identity if every
    /// identity is rejected, or if a login attempt times out.
    pub async fn login(self, config: &ConnectionConfig) -> Result<ImapClient> {
        let Self { mut client, server } = self;
        let mut flow = LoginFlow::for_config(config);

        while let Some(username) = flow.identity() {
            if flow.is_retry() {
                info!("Retrying login on {} with username '{}'", server, username);
            }
            let attempt =
                tokio::time::timeout(config.timeout, client.login(username, &config.password))
                    .await;

            match attempt {
                Ok(Ok(session)) => {
                    info!("Logged in to {} as '{}'", server, username);
                    return Ok(ImapClient {
                        session,
                        config: config.clone(),
                        server,
                        timeout: config.timeout,
                        selected: None,
                        state: SessionState::Ready,
                    });
                }
                Ok(Err((e, returned))) => {
                    warn!("Login with username '{}' failed: {}", username, e);
                    client = returned;
                    flow.reject(Error::Auth {
                        username: username.to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!("Login with username '{}' timed out", username);
                    flow.reject(Error::Auth {
                        username: username.to_string(),
                        reason: format!("timed out after {}s", config.timeout.as_secs()),
                    });
                    // The connection went down with the timed-out attempt.
                    break;
                }
            }
        }

        Err(flow.into_error())
    }
}

/// Authenticated IMAP session used for the backup run.
///
/// A command that times out or fails below the protocol level leaves
/// the session flagged; the next command first replaces it with a fresh
/// connection, logged in and with the same mailbox selected.
pub struct ImapClient {
    session: ImapSession,
    config: ConnectionConfig,
    server: String,
    timeout: Duration,
    selected: Option<Mailbox>,
    state: SessionState,
}

impl ImapClient {
    /// Connect and log in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] or [`Error::Auth`], as
    /// [`ImapConnection::open`] and [`ImapConnection::login`] do.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        ImapConnection::open(config).await?.login(config).await
    }

    fn mailbox_name(&self) -> String {
        self.selected
            .as_ref()
            .map_or_else(String::new, ToString::to_string)
    }

    fn mailbox_error(&self, reason: impl Into<String>) -> Error {
        Error::Mailbox {
            mailbox: self.mailbox_name(),
            reason: reason.into(),
        }
    }

    fn note_failure(&mut self, failure: Failure) -> String {
        if failure.desynced {
            warn!("{}: session out of sync", self.server);
            self.state.desync();
        }
        failure.reason
    }

    async fn reopen(&self) -> Result<ImapSession> {
        let fresh = ImapConnection::open(&self.config)
            .await?
            .login(&self.config)
            .await?;
        let mut session = fresh.session;
        if let Some(mailbox) = &self.selected {
            bounded(self.timeout, session.select(mailbox.as_str()))
                .await
                .map_err(|failure| Error::Mailbox {
                    mailbox: mailbox.to_string(),
                    reason: format!("SELECT failed: {}", failure.reason),
                })?;
        }
        Ok(session)
    }

    /// Swap in a fresh session if the current one is out of sync.
    async fn ensure_in_sync(&mut self) -> std::result::Result<(), String> {
        if !self.state.needs_reconnect()? {
            return Ok(());
        }
        info!("Reconnecting to {}", self.server);
        match self.reopen().await {
            Ok(session) => {
                self.session = session;
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                warn!("Reconnect to {} failed: {}", self.server, reason);
                self.state = SessionState::Lost(reason.clone());
                Err(reason)
            }
        }
    }
}

impl MailClient for ImapClient {
    async fn list_mailboxes(&mut self) -> (Vec<Mailbox>, Vec<String>) {
        debug!("Listing mailboxes on {}", self.server);
        let listing = match self.ensure_in_sync().await {
            Ok(()) => {
                let session = &mut self.session;
                bounded(self.timeout, async {
                    session
                        .list(Some(""), Some("*"))
                        .await?
                        .try_collect::<Vec<_>>()
                        .await
                })
                .await
                .map_err(|failure| self.note_failure(failure))
            }
            Err(reason) => Err(format!("session lost: {reason}")),
        };

        let names: Vec<Name> = match listing {
            Ok(names) => names,
            Err(reason) => {
                let warning = format!("{}: could not list mailboxes: {reason}", self.server);
                warn!("{}", warning);
                return (Vec::new(), vec![warning]);
            }
        };

        let mailboxes: Vec<Mailbox> = names
            .iter()
            .map(|name| Mailbox::new(name.name()))
            .collect();
        info!("Mailboxes found on {}: {:?}", self.server, mailboxes);
        (mailboxes, Vec::new())
    }

    async fn select_mailbox(&mut self, mailbox: &Mailbox) -> Result<()> {
        self.selected = None;
        let mailbox_error = |reason: String| Error::Mailbox {
            mailbox: mailbox.to_string(),
            reason,
        };
        self.ensure_in_sync()
            .await
            .map_err(|reason| mailbox_error(format!("session lost: {reason}")))?;

        let selected = bounded(self.timeout, self.session.select(mailbox.as_str())).await;
        if let Err(failure) = selected {
            let reason = self.note_failure(failure);
            return Err(mailbox_error(format!("SELECT failed: {reason}")));
        }

        debug!("{}: {}: Selected", self.server, mailbox);
        self.selected = Some(mailbox.clone());
        Ok(())
    }

    async fn list_message_ids(&mut self) -> Result<Vec<MessageId>> {
        let Some(mailbox) = self.selected.clone() else {
            return Err(self.mailbox_error("no mailbox selected"));
        };
        let mailbox_error = |reason: String| Error::Mailbox {
            mailbox: mailbox.to_string(),
            reason,
        };
        self.ensure_in_sync()
            .await
            .map_err(|reason| mailbox_error(format!("session lost: {reason}")))?;

        let seqs = match bounded(self.timeout, self.session.search("ALL")).await {
            Ok(seqs) => seqs,
            Err(failure) => {
                let reason = self.note_failure(failure);
                return Err(mailbox_error(format!("SEARCH failed: {reason}")));
            }
        };

        // SEARCH results arrive as a set; ascending order restores the
        // server's message order.
        let mut seqs: Vec<u32> = seqs.into_iter().collect();
        seqs.sort_unstable();

        debug!("{}: {}: {} messages found", self.server, mailbox, seqs.len());
        Ok(seqs
            .into_iter()
            .map(|seq| MessageId::Imap(seq.to_string()))
            .collect())
    }

    async fn fetch_message(&mut self, id: &MessageId) -> Result<Option<Vec<u8>>> {
        let mailbox = self.mailbox_name();
        let token = id.token();
        let fetch_error = |reason: String| Error::Fetch {
            mailbox: mailbox.clone(),
            id: token.clone(),
            reason,
        };
        let Ok(seq) = token.parse::<u32>() else {
            return Err(fetch_error("not a message sequence number".into()));
        };
        self.ensure_in_sync()
            .await
            .map_err(|reason| fetch_error(format!("session lost: {reason}")))?;
        debug!("{}: {}: Fetching {}", self.server, mailbox, token);

        let session = &mut self.session;
        let fetched: std::result::Result<Vec<Fetch>, Failure> = bounded(self.timeout, async {
            session
                .fetch(&token, "RFC822")
                .await?
                .try_collect::<Vec<_>>()
                .await
        })
        .await;
        let responses = match fetched {
            Ok(responses) => responses,
            Err(failure) => {
                let reason = self.note_failure(failure);
                return Err(fetch_error(format!("FETCH failed: {reason}")));
            }
        };

        let mut body = None;
        for msg in &responses {
            if msg.message != seq {
                debug!(
                    "{}: {}: Ignoring FETCH data for {} while fetching {}",
                    self.server, mailbox, msg.message, seq
                );
                continue;
            }
            if body.is_none() {
                body = msg.body().filter(|b| !b.is_empty()).map(<[u8]>::to_vec);
            }
        }
        Ok(body)
    }

    async fn close(mut self) {
        if self.state != SessionState::Ready {
            debug!("Dropping out-of-sync session to {} without LOGOUT", self.server);
            return;
        }
        match tokio::time::timeout(self.timeout, self.session.logout()).await {
            Ok(Ok(())) => debug!("Logged out of {}", self.server),
            Ok(Err(e)) => warn!("Logout from {} failed: {}", self.server, e),
            Err(_) => warn!("Logout from {} timed out", self.server),
        }
    }
}

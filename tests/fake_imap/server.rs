//! In-process fake IMAP server for integration testing
//!
//! ## Connection lifecycle
//!
//! The server speaks IMAPS (implicit TLS, as on port 993): the TLS
//! handshake comes first and the greeting is the first thing sent over
//! the encrypted stream.
//!
//! ```text
//!   Client connects via TCP, TLS handshake
//!       |
//!   Server sends greeting: "* OK IMAP4rev1 ready\r\n"
//!       |
//!   Client sends LOGIN (again, with another identity, if rejected)
//!       |
//!   Client issues commands: LIST, SELECT, SEARCH, FETCH
//!       |
//!   Client sends LOGOUT
//! ```
//!
//! ## Command format
//!
//! Every client command starts with a **tag** the client chooses
//! (async-imap uses `A0001`, `A0002`, ...). The server echoes it in the
//! completion response. Lines prefixed with `*` are untagged data sent
//! before the final tagged OK/NO/BAD:
//!
//! ```text
//!   Client:  A0002 LIST "" "*"
//!   Server:  * LIST (\HasNoChildren) "/" "INBOX"
//!   Server:  A0002 OK LIST completed
//! ```

use super::handlers::{
    handle_fetch, handle_list, handle_login, handle_logout, handle_search, handle_select,
};
use super::io::write_line;
use super::mailbox::{LoginAttempt, Mailbox};
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// A fake IMAP server on localhost with an OS-assigned port.
///
/// A self-signed certificate for `127.0.0.1` is generated at startup
/// with `rcgen`; clients connect with certificate verification off.
pub struct FakeImapServer {
    port: u16,
    attempts: Arc<Mutex<Vec<LoginAttempt>>>,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a new fake IMAP server serving `mailbox`.
    ///
    /// The server runs until the `FakeImapServer` is dropped.
    pub async fn start(mailbox: Mailbox) -> Self {
        // Multiple tests may race to install the provider; ignore the
        // error if it's already set.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let acceptor = tls_acceptor();
        let mailbox = Arc::new(mailbox);
        let attempts = Arc::new(Mutex::new(Vec::new()));

        let log = attempts.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let mailbox = mailbox.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let Ok(tls_stream) = acceptor.accept(stream).await else {
                        return;
                    };
                    handle_imap_session(tls_stream, &mailbox, &log).await;
                });
            }
        });

        Self {
            port,
            attempts,
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Every LOGIN received so far, in order.
    pub fn login_attempts(&self) -> Vec<LoginAttempt> {
        self.attempts.lock().unwrap().clone()
    }
}

/// Server-side TLS config with a fresh self-signed certificate.
fn tls_acceptor() -> TlsAcceptor {
    let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
        .expect("generate self-signed cert");

    let cert_der = cert.cert.der().clone();
    let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der.into())
        .expect("build server TLS config");

    TlsAcceptor::from(Arc::new(tls_config))
}

/// Extract the folder name from a parsed `imap_types::Mailbox`.
fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Run the IMAP command loop over an established TLS stream.
///
/// Each line is parsed with `imap-codec`'s `CommandCodec` and
/// dispatched on its `CommandBody`. Mailbox commands are refused until
/// a LOGIN has succeeded.
async fn handle_imap_session<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    mailbox: &Mailbox,
    attempts: &Mutex<Vec<LoginAttempt>>,
) {
    let mut reader = BufReader::new(stream);
    let mut authenticated = false;
    let mut selected_folder: Option<String> = None;
    let codec = CommandCodec::default();

    if write_line(&mut reader, "* OK IMAP4rev1 Fake server ready\r\n")
        .await
        .is_err()
    {
        return;
    }

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let Ok((_, command)) = codec.decode(line.as_bytes()) else {
            let tag = trimmed.split_whitespace().next().unwrap_or("*");
            let resp = format!("{tag} BAD Parse error\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        };

        let tag = command.tag.inner();

        match command.body {
            CommandBody::Login { .. } => {
                match handle_login(tag, &line, mailbox, attempts, &mut reader).await {
                    Some(accepted) => authenticated |= accepted,
                    None => break,
                }
            }
            CommandBody::Logout => {
                handle_logout(tag, &mut reader).await;
                break;
            }
            _ if !authenticated => {
                let resp = format!("{tag} NO Not authenticated\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
            CommandBody::List { .. } => {
                handle_list(tag, mailbox, &mut reader).await;
            }
            CommandBody::Select { mailbox: mb, .. } => {
                let name = mailbox_name(&mb);
                selected_folder = handle_select(tag, &name, mailbox, &mut reader).await;
            }
            CommandBody::Search { uid: false, .. } => {
                handle_search(tag, mailbox, selected_folder.as_deref(), &mut reader).await;
            }
            CommandBody::Fetch {
                sequence_set,
                uid: false,
                ..
            } => {
                handle_fetch(
                    tag,
                    &sequence_set,
                    mailbox,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            _ => {
                let resp = format!("{tag} BAD Unknown command\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
        }
    }
}

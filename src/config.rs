//! Connection and storage configuration

use crate::error::{Error, Result};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default chunk budget for mbox archives: 128 MiB.
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 128 * 1024 * 1024;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Mail retrieval protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// IMAP4 over implicit TLS.
    Imap,
    /// POP3 over implicit TLS.
    Pop3,
}

impl Protocol {
    /// Well-known implicit-TLS port for the protocol.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Imap => 993,
            Self::Pop3 => 995,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Imap => "IMAP",
            Self::Pop3 => "POP3",
        })
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("imap") {
            Ok(Self::Imap)
        } else if s.eq_ignore_ascii_case("pop3") {
            Ok(Self::Pop3)
        } else {
            Err(Error::Config(format!("Unsupported protocol: {s}")))
        }
    }
}

/// Storage layout for fetched messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaverKind {
    /// Size-bounded rotating mbox archives.
    Mbox,
    /// One `.eml` file per message.
    Eml,
}

impl fmt::Display for SaverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mbox => "MBOX",
            Self::Eml => "EML",
        })
    }
}

impl FromStr for SaverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("mbox") {
            Ok(Self::Mbox)
        } else if s.eq_ignore_ascii_case("eml") {
            Ok(Self::Eml)
        } else {
            Err(Error::Config(format!("Unsupported file type: {s}")))
        }
    }
}

/// Everything needed to reach and authenticate against one mail account.
///
/// Built once per run and never mutated afterwards.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub server_address: String,
    pub port: u16,
    pub protocol: Protocol,
    /// Bound applied to each individual network step.
    pub timeout: Duration,
    /// Identity tried first, usually `localpart@domain`.
    pub primary_username: String,
    /// Raw account name retried when the primary identity is rejected.
    pub fallback_username: Option<String>,
    pub password: String,
    /// Skip certificate verification (self-signed bridges, test servers).
    pub accept_invalid_certs: bool,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("server_address", &self.server_address)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("timeout", &self.timeout)
            .field("primary_username", &self.primary_username)
            .field("fallback_username", &self.fallback_username)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish_non_exhaustive()
    }
}

impl ConnectionConfig {
    /// Build a config from the operator-supplied account name.
    ///
    /// The primary identity is derived from the account and the server
    /// address (`alice` on `imap.example.com` becomes
    /// `alice@example.com`); the raw account is kept as fallback.
    #[must_use]
    pub fn new(
        server_address: impl Into<String>,
        port: u16,
        protocol: Protocol,
        timeout: Duration,
        account: &str,
        password: impl Into<String>,
    ) -> Self {
        let server_address = server_address.into();
        let account = account.trim();
        let primary_username = derive_email(account, &server_address);
        let fallback_username = Some(account.to_string())
            .filter(|a| !a.is_empty() && *a != primary_username);

        Self {
            server_address,
            port,
            protocol,
            timeout,
            primary_username,
            fallback_username,
            password: password.into(),
            accept_invalid_certs: false,
        }
    }

    /// Load the connection configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `MAIL_SERVER`
    /// - `MAIL_USERNAME`
    /// - `MAIL_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `MAIL_PROTOCOL` (default: `IMAP`)
    /// - `MAIL_PORT` (default: 993 for IMAP, 995 for POP3)
    /// - `MAIL_TIMEOUT` in seconds (default: `30`)
    /// - `MAIL_TLS_ACCEPT_INVALID` (default: `false`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or a
    /// value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let server = var("MAIL_SERVER")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::Config("MAIL_SERVER not set".into()))?;
        let protocol = var("MAIL_PROTOCOL")
            .map_or(Ok(Protocol::Imap), |p| p.trim().parse())?;
        let port = match var("MAIL_PORT") {
            Some(p) => p
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("Invalid MAIL_PORT: {e}")))?,
            None => protocol.default_port(),
        };
        let timeout = match var("MAIL_TIMEOUT") {
            Some(t) => t
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("Invalid MAIL_TIMEOUT: {e}")))?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        let username = var("MAIL_USERNAME").unwrap_or_default();
        let password = var("MAIL_PASSWORD").unwrap_or_default();
        if username.trim().is_empty() || password.is_empty() {
            return Err(Error::Config("Username and Password are required".into()));
        }

        let mut config = Self::new(
            server.trim(),
            port,
            protocol,
            Duration::from_secs(timeout),
            &username,
            password,
        );
        config.accept_invalid_certs = var("MAIL_TLS_ACCEPT_INVALID")
            .is_some_and(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes"));
        Ok(config)
    }

    /// `host:port` as used for connecting and in operator messages.
    #[must_use]
    pub fn server(&self) -> String {
        format!("{}:{}", self.server_address, self.port)
    }

    /// The part of the primary identity before `@`, used to name archives.
    #[must_use]
    pub fn account_local_part(&self) -> &str {
        self.primary_username
            .split('@')
            .next()
            .unwrap_or(&self.primary_username)
    }
}

fn derive_email(account: &str, server_address: &str) -> String {
    if account.contains('@') {
        return account.to_string();
    }
    match server_address.split_once('.') {
        Some((_, domain)) if !account.is_empty() && !domain.is_empty() => {
            format!("{account}@{domain}")
        }
        _ => account.to_string(),
    }
}

/// Where and how fetched messages are persisted.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub kind: SaverKind,
    pub output_dir: PathBuf,
    /// Payload byte budget for one mbox chunk.
    pub max_chunk_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: SaverKind::Mbox,
            output_dir: PathBuf::from("backups"),
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

impl StorageConfig {
    /// Load the storage configuration from environment variables
    ///
    /// Optional (with defaults):
    /// - `BACKUP_FORMAT` (`MBOX` or `EML`, default: `MBOX`)
    /// - `BACKUP_DIR` (default: `backups`)
    /// - `BACKUP_MAX_FILE_SIZE` in MiB (default: `128`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a value cannot be parsed or the size
    /// is not positive.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(kind) = var("BACKUP_FORMAT") {
            config.kind = kind.trim().parse()?;
        }
        if let Some(dir) = var("BACKUP_DIR").filter(|d| !d.trim().is_empty()) {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(size) = var("BACKUP_MAX_FILE_SIZE") {
            let mib: u64 = size
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("Invalid BACKUP_MAX_FILE_SIZE: {e}")))?;
            config.max_chunk_size = mib_to_bytes(mib)?;
        }
        Ok(config)
    }
}

/// Convert a MiB count from the operator into a byte budget.
///
/// # Errors
///
/// Returns [`Error::Config`] for zero or an overflowing count.
pub fn mib_to_bytes(mib: u64) -> Result<u64> {
    if mib == 0 {
        return Err(Error::Config("Maximum file size must be positive".into()));
    }
    mib.checked_mul(1024 * 1024)
        .ok_or_else(|| Error::Config(format!("Maximum file size too large: {mib} MiB")))
}

//! Backup orchestration
//!
//! One run walks every mailbox the client lists, fetches each message in
//! turn and hands it to a [`Saver`] scoped to that mailbox. Only
//! connecting and logging in can fail the run; everything after that is
//! recorded in the [`BackupReport`] and the run carries on.

use crate::client::{ImapClient, MailClient, Pop3Client};
use crate::config::{ConnectionConfig, Protocol, StorageConfig};
use crate::error::Result;
use crate::mailbox::Mailbox;
use crate::report::{BackupReport, MailboxReport, SkipReason};
use crate::saver::Saver;
use tracing::{debug, info, warn};

/// Connect with the protocol `config` names, log in and back up every
/// mailbox into `storage`.
///
/// # Errors
///
/// Returns [`Error::Connect`](crate::Error::Connect) or
/// [`Error::Auth`](crate::Error::Auth) when connecting or logging in
/// fails. Everything after login is recorded in the report instead.
pub async fn run_backup(
    config: &ConnectionConfig,
    storage: &StorageConfig,
) -> Result<BackupReport> {
    info!(
        "Backing up {} on {} ({}) to {} as {}",
        config.primary_username,
        config.server(),
        config.protocol,
        storage.output_dir.display(),
        storage.kind
    );

    let backup = Backup::new(config, storage.clone());
    let report = match config.protocol {
        Protocol::Imap => backup.run(ImapClient::connect(config).await?).await,
        Protocol::Pop3 => backup.run(Pop3Client::connect(config).await?).await,
    };

    info!(
        "Backup of {} finished: {} saved, {} skipped, {} mailboxes failed",
        report.server,
        report.total_saved(),
        report.total_skipped(),
        report.failed_mailboxes().count()
    );
    Ok(report)
}

/// A backup run over an already authenticated [`MailClient`].
#[derive(Debug, Clone)]
pub struct Backup {
    server: String,
    account: String,
    storage: StorageConfig,
}

impl Backup {
    #[must_use]
    pub fn new(config: &ConnectionConfig, storage: StorageConfig) -> Self {
        Self {
            server: config.server(),
            account: config.account_local_part().to_string(),
            storage,
        }
    }

    /// Back up every mailbox `client` lists, then log it out.
    pub async fn run<C: MailClient>(&self, mut client: C) -> BackupReport {
        let mut report = BackupReport::new(self.server.clone(), self.account.clone());

        let (mailboxes, warnings) = client.list_mailboxes().await;
        report.warnings.extend(warnings);

        for mailbox in mailboxes {
            let mailbox_report = self.backup_mailbox(&mut client, mailbox).await;
            report.mailboxes.push(mailbox_report);
        }

        client.close().await;
        report
    }

    async fn backup_mailbox<C: MailClient>(
        &self,
        client: &mut C,
        mailbox: Mailbox,
    ) -> MailboxReport {
        let mut report = MailboxReport::new(mailbox);
        let mailbox = report.mailbox.clone();

        if let Err(e) = client.select_mailbox(&mailbox).await {
            warn!("{}: {}: skipped: {}", self.server, mailbox, e);
            report.error = Some(e.to_string());
            return report;
        }

        let ids = match client.list_message_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("{}: {}: skipped: {}", self.server, mailbox, e);
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.found = ids.len();
        info!("{}: {}: {} messages", self.server, mailbox, ids.len());

        let mut saver = match Saver::open(&self.storage, &self.account, &mailbox) {
            Ok(saver) => saver,
            Err(e) => {
                warn!("{}: {}: skipped: {}", self.server, mailbox, e);
                report.error = Some(e.to_string());
                return report;
            }
        };

        for id in ids {
            match client.fetch_message(&id).await {
                Ok(Some(raw)) => match saver.add(&raw, &id.token()) {
                    Ok(()) => {
                        debug!("{}: {}: saved message {}", self.server, mailbox, id);
                        report.saved += 1;
                    }
                    Err(e) => {
                        warn!("{}: {}: message {} lost: {}", self.server, mailbox, id, e);
                        report.skip(id, SkipReason::Write(e.to_string()));
                    }
                },
                Ok(None) => {
                    warn!(
                        "{}: {}: message {} lost: server returned no payload",
                        self.server, mailbox, id
                    );
                    report.skip(id, SkipReason::Empty);
                }
                Err(e) => {
                    warn!("{}: {}: message {} lost: {}", self.server, mailbox, id, e);
                    report.skip(id, SkipReason::Fetch(e.to_string()));
                }
            }
        }

        if let Err(e) = saver.close() {
            warn!("{}: {}: closing storage failed: {}", self.server, mailbox, e);
            report.error = Some(e.to_string());
        }
        report
    }
}

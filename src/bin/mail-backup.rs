#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI that backs up one mail account over IMAP or POP3

use clap::Parser;
use mail_backup::{
    BackupReport, ConnectionConfig, SaverKind, StorageConfig, mib_to_bytes, run_backup,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Connection settings come from `MAIL_*` environment variables (or a
/// `.env` file); storage settings from `BACKUP_*`, overridable here.
#[derive(Parser)]
#[command(name = "mail-backup")]
#[command(about = "Back up a mail account to mbox archives or eml files")]
struct Args {
    /// Storage format: MBOX or EML
    #[arg(long)]
    format: Option<SaverKind>,

    /// Directory the backup is written to
    #[arg(long)]
    output: Option<PathBuf>,

    /// Maximum size of one mbox file in MiB
    #[arg(long)]
    max_size: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = ConnectionConfig::from_env()?;
    let storage = storage_config(&args)?;

    let report = run_backup(&config, &storage).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn storage_config(args: &Args) -> anyhow::Result<StorageConfig> {
    let mut storage = StorageConfig::from_env()?;
    if let Some(kind) = args.format {
        storage.kind = kind;
    }
    if let Some(output) = &args.output {
        storage.output_dir.clone_from(output);
    }
    if let Some(mib) = args.max_size {
        storage.max_chunk_size = mib_to_bytes(mib)?;
    }
    Ok(storage)
}

fn print_report(report: &BackupReport) {
    println!("Backup of {} on {}", report.account, report.server);
    for warning in &report.warnings {
        println!("warning: {warning}");
    }

    if report.mailboxes.is_empty() {
        println!("No mailboxes found.");
        return;
    }

    println!();
    println!(
        "{:<30} {:>8} {:>8} {:>8}  {}",
        "Mailbox", "Found", "Saved", "Skipped", "Status"
    );
    println!("{}", "-".repeat(72));

    for mailbox in &report.mailboxes {
        println!(
            "{:<30} {:>8} {:>8} {:>8}  {}",
            truncate(mailbox.mailbox.as_str(), 30),
            mailbox.found,
            mailbox.saved,
            mailbox.skipped.len(),
            mailbox.error.as_deref().unwrap_or("ok"),
        );
        for skipped in &mailbox.skipped {
            println!("    message {}: {}", skipped.id, skipped.reason);
        }
    }

    println!(
        "\n{} message(s) saved, {} skipped",
        report.total_saved(),
        report.total_skipped()
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

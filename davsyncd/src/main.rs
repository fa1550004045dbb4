use std::process::ExitCode;

use anyhow::Context;
use davsync_core::DavClient;
use davsyncd::config::DaemonConfig;
use davsyncd::sync::item::{DeletionMode, ItemStatus, SyncItem};
use davsyncd::sync::journal::JournalStore;
use davsyncd::sync::propagator::{AbortType, ActiveJobs, PropagateOptions, Propagator};
use davsyncd::sync::remote_delete::JobRun;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "davsyncd=info";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DeleteArgs {
    path: String,
    directory: bool,
    permanent: bool,
    lock_token: Option<String>,
    encrypted_name: Option<String>,
    encrypted: bool,
}

impl DeleteArgs {
    fn into_item(self) -> SyncItem {
        let mut item = if self.directory {
            SyncItem::directory(self.path)
        } else {
            SyncItem::file(self.path)
        };
        if let Some(token) = self.lock_token {
            item = item.with_lock(token);
        }
        if self.permanent {
            item = item.with_deletion(DeletionMode::PermanentDelete);
        }
        match self.encrypted_name {
            Some(name) => item.with_encrypted_name(name),
            None if self.encrypted => item.with_encryption(),
            None => item,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Delete(DeleteArgs),
    Exclude(Vec<String>),
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let Some(command) = args.next() else {
        return Ok(CliMode::Help);
    };
    match command.as_str() {
        "--help" | "-h" | "help" => Ok(CliMode::Help),
        "delete" => parse_delete_args(args).map(CliMode::Delete),
        "exclude" => {
            let paths: Vec<String> = args.collect();
            if paths.is_empty() {
                anyhow::bail!("exclude needs at least one path");
            }
            Ok(CliMode::Exclude(paths))
        }
        other => anyhow::bail!("unknown command: {other}"),
    }
}

fn parse_delete_args<I>(mut args: I) -> anyhow::Result<DeleteArgs>
where
    I: Iterator<Item = String>,
{
    let mut parsed = DeleteArgs::default();
    let mut path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dir" => parsed.directory = true,
            "--permanent" => parsed.permanent = true,
            "--encrypted" => parsed.encrypted = true,
            "--lock" => {
                parsed.lock_token = Some(args.next().context("--lock needs a token")?);
            }
            "--encrypted-name" => {
                parsed.encrypted_name = Some(args.next().context("--encrypted-name needs a name")?);
            }
            other if other.starts_with("--") => anyhow::bail!("unknown argument: {other}"),
            other => {
                if path.replace(other.to_string()).is_some() {
                    anyhow::bail!("delete takes exactly one path");
                }
            }
        }
    }
    parsed.path = path.context("delete needs a path")?;
    Ok(parsed)
}

fn print_usage() {
    println!("Usage: davsyncd <command>");
    println!("  delete <path> [--dir] [--permanent] [--lock <token>]");
    println!("         [--encrypted-name <name>] [--encrypted]");
    println!("                 Propagate a local deletion to the server");
    println!("  exclude <path>...");
    println!("                 Add paths to the selective-sync exclusion list");
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        print_usage();
        return Ok(ExitCode::SUCCESS);
    }

    let config = DaemonConfig::from_env()?;
    let journal = JournalStore::open_path(config.journal_path.clone())
        .await
        .with_context(|| format!("failed to open journal at {:?}", config.journal_path))?;

    match mode {
        CliMode::Help => Ok(ExitCode::SUCCESS),
        CliMode::Exclude(paths) => {
            let mut excluded = journal.excluded_paths().await?;
            excluded.extend(paths);
            excluded.sort();
            excluded.dedup();
            journal.set_excluded_paths(&excluded).await?;
            info!(count = excluded.len(), "selective sync list updated");
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "excluded": excluded }))?
            );
            Ok(ExitCode::SUCCESS)
        }
        CliMode::Delete(args) => {
            let client = DavClient::new(&config.server_url, config.credentials.clone())
                .context("invalid DAVSYNC_SERVER_URL")?;
            let options = PropagateOptions {
                remote_root: config.remote_root.clone(),
                vfs: config.vfs.clone(),
            };
            let (propagator, mut events) = Propagator::new(client, journal, options);
            let (job, handle) = propagator.remote_delete(args.into_item());

            let run = job.run();
            tokio::pin!(run);
            let run = tokio::select! {
                run = &mut run => run,
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, aborting remote delete");
                    handle.abort(AbortType::Synchronous);
                    run.await
                }
            };

            for event in ActiveJobs::default().drain(&mut events) {
                debug!(?event, "job event");
            }

            let (report, success) = match run {
                JobRun::Finished(report) => {
                    let success = report.outcome.status == ItemStatus::Success;
                    let value = serde_json::json!({
                        "file": report.item.file,
                        "status": report.outcome.status,
                        "category": report.outcome.category,
                        "message": report.outcome.message,
                        "http_status": report.item.http_error_code,
                        "request_id": report.item.request_id,
                        "response_timestamp": report.item.response_timestamp,
                        "another_sync_needed": propagator.another_sync_needed(),
                    });
                    (value, success)
                }
                JobRun::Aborted { item } => (
                    serde_json::json!({ "file": item.file, "status": "aborted" }),
                    false,
                ),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

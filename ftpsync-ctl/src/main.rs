mod control_client;
mod push_tree;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use control_client::SyncClient;
use ftpsync_integrations::params::{
    validate_folder, validate_remote_file, validate_transfer,
};
use push_tree::plan_tree;

#[derive(Parser, Debug)]
#[command(name = "ftpsync-ctl", version)]
#[command(about = "Control a running ftpsyncd over D-Bus")]
struct Cli {
    /// D-Bus address of the agent's bus (defaults to FTPSYNC_DBUS_ADDRESS, then the session bus)
    #[arg(long, global = true)]
    bus: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the agent version
    Version,
    /// Check that the agent answers
    Ping {
        #[arg(default_value = "")]
        message: String,
    },
    /// Replicate one local file
    Sync {
        local: String,
        remote: String,
        /// Wait for the transfer instead of queueing it
        #[arg(long)]
        now: bool,
    },
    /// List a remote folder
    List {
        folder: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Delete a remote file
    Delete {
        remote: String,
        /// Return before the delete finishes
        #[arg(long = "async")]
        detached: bool,
    },
    /// Check whether a remote file exists
    Exists { remote: String },
    /// Show connection and queue state
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Queue every file below a local directory
    PushTree {
        local_root: PathBuf,
        remote_prefix: String,
    },
}

fn validate(command: &Command) -> anyhow::Result<()> {
    match command {
        Command::Sync { local, remote, .. } => validate_transfer(local, remote)?,
        Command::List { folder, .. } => validate_folder(folder)?,
        Command::Delete { remote, .. } | Command::Exists { remote } => {
            validate_remote_file(remote)?
        }
        Command::PushTree { remote_prefix, .. } => validate_folder(remote_prefix)?,
        Command::Version | Command::Ping { .. } | Command::Status { .. } => {}
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    validate(&cli.command).context("error params")?;

    let address = cli
        .bus
        .clone()
        .or_else(|| std::env::var("FTPSYNC_DBUS_ADDRESS").ok());
    let plan = match &cli.command {
        Command::PushTree {
            local_root,
            remote_prefix,
        } => Some(plan_tree(local_root, remote_prefix)?),
        _ => None,
    };
    let client = SyncClient::connect(address.as_deref())?;

    match cli.command {
        Command::Version => println!("{}", client.version()?),
        Command::Ping { message } => println!("{}", client.ping(&message)?),
        Command::Sync { local, remote, now } => {
            if now {
                client.sync_now(&local, &remote)?;
                println!("synced {local} -> {remote}");
            } else {
                client.sync_async(&local, &remote)?;
                println!("queued {local} -> {remote}");
            }
        }
        Command::List { folder, recursive } => {
            for path in client.list_files(&folder, recursive)? {
                println!("{path}");
            }
        }
        Command::Delete { remote, detached } => {
            println!("{}", client.delete(&remote, detached)?);
        }
        Command::Exists { remote } => println!("{}", client.exists(&remote)?),
        Command::Status { json } => {
            let status = client.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!(
                    "connection={} cached_folders={} queued={} scheduled={}",
                    status.connection,
                    status.cached_folders,
                    status.queued_jobs,
                    status.scheduled_jobs
                );
            }
        }
        Command::PushTree { .. } => {
            let mut queued = 0usize;
            for upload in plan.unwrap_or_default() {
                let local = upload.local.to_string_lossy();
                match client.sync_async(&local, &upload.remote) {
                    Ok(()) => {
                        println!("{local} {}", upload.remote);
                        queued += 1;
                    }
                    Err(err) => eprintln!("[ftpsync-ctl] {err:#}"),
                }
            }
            println!("queued {queued} file(s)");
        }
    }
    Ok(())
}

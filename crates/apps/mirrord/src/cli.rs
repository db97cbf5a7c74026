use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// mirrord - keeps local mailbox mirrors in sync with the provider
#[derive(Parser)]
#[command(name = "mirrord")]
#[command(about = "Incremental mailbox mirror worker")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Settings file (defaults to settings.json in the config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Number of dispatcher workers, overriding the settings file
    #[arg(long, global = true)]
    pub workers: Option<usize>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the dispatcher, syncing every registered account on an interval
    Run {
        /// Enqueue every account once, drain the queue and exit
        #[arg(long)]
        once: bool,
    },

    /// Run one sync cycle for a user in the foreground
    Sync {
        user_id: String,
    },

    /// Print the last published sync status of a user as JSON
    Status {
        user_id: String,
    },

    /// Register an account, or refresh its credential
    Register {
        user_id: String,
        account_id: String,
        access_token: String,

        /// Days of history the provider mirrors on first sync
        #[arg(long)]
        days_within: Option<u32>,
    },

    /// List registered accounts and their cursors as JSON
    Accounts,

    /// List threads visible to an address as JSON
    Threads {
        address: String,

        #[arg(long, default_value_t = 50)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Print one thread with its messages and members as JSON
    Thread {
        thread_id: String,
    },
}

//! mirrord - worker daemon and operator CLI for the mailbox mirror
//!
//! This is the main entry point: it wires settings, the SQLite stores and the
//! provider client into a sync engine, then runs the requested command.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;

use mirror::{
    Account, AurinkoClient, CycleOutcome, Dispatcher, MailStore, Settings, SqliteCoordination,
    SqliteMailStore, SyncEngine, ThreadId, get_thread_detail, list_threads_for_address,
};

mod cli;

use cli::{Cli, Command};

/// Everything a command needs, opened once per process
struct App {
    settings: Settings,
    store: Arc<SqliteMailStore>,
    engine: Arc<SyncEngine>,
}

impl App {
    fn open(cli: &Cli) -> Result<Self> {
        let mut settings = Settings::load(cli.config.as_deref())?;
        if let Some(workers) = cli.workers {
            settings.worker.workers = workers.max(1);
        }

        let store = Arc::new(
            SqliteMailStore::new(&settings.storage.database_path).with_context(|| {
                format!(
                    "Failed to open mirror database at {}",
                    settings.storage.database_path.display()
                )
            })?,
        );
        let coordination = Arc::new(
            SqliteCoordination::new(&settings.storage.coordination_path).with_context(|| {
                format!(
                    "Failed to open coordination store at {}",
                    settings.storage.coordination_path.display()
                )
            })?,
        );
        let provider = Arc::new(AurinkoClient::from_settings(&settings));

        let engine = Arc::new(SyncEngine::new(
            provider,
            store.clone(),
            coordination,
            &settings,
        ));

        Ok(Self {
            settings,
            store,
            engine,
        })
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        warn!("Failed to initialize config directory: {}", e);
    }

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let app = App::open(&cli)?;

    match cli.command {
        Command::Run { once } => run_dispatcher(app, once).await,
        Command::Sync { user_id } => sync_once(app, user_id).await,
        Command::Status { user_id } => {
            let status = app.engine.status(&user_id)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Register {
            user_id,
            account_id,
            access_token,
            days_within,
        } => register(
            &app,
            &user_id,
            &account_id,
            &access_token,
            days_within.unwrap_or(app.settings.provider.days_within),
        ),
        Command::Accounts => {
            let accounts = app.store.list_accounts()?;
            let listing: Vec<_> = accounts
                .iter()
                .map(|a| {
                    serde_json::json!({
                        "userId": a.user_id,
                        "accountId": a.account_id,
                        "updatedCursor": a.updated_cursor,
                        "deletedCursor": a.deleted_cursor,
                        "daysWithin": a.days_within,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&listing)?);
            Ok(())
        }
        Command::Threads {
            address,
            limit,
            offset,
        } => {
            let threads = list_threads_for_address(app.store.as_ref(), &address, limit, offset)?;
            println!("{}", serde_json::to_string_pretty(&threads)?);
            Ok(())
        }
        Command::Thread { thread_id } => {
            let id = ThreadId::new(thread_id);
            let detail = get_thread_detail(app.store.as_ref(), &id)?
                .ok_or_else(|| anyhow!("Thread {} not found", id.as_str()))?;
            println!("{}", serde_json::to_string_pretty(&detail)?);
            Ok(())
        }
    }
}

/// Enqueue every registered account each poll interval until Ctrl-C
async fn run_dispatcher(app: App, once: bool) -> Result<()> {
    let dispatcher = Dispatcher::start(app.engine.clone(), &app.settings.worker);

    let mut ticker = tokio::time::interval(app.settings.worker.poll_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let store = app.store.clone();
                let accounts = tokio::task::spawn_blocking(move || store.list_accounts())
                    .await
                    .map_err(|e| anyhow!("Account listing task failed: {}", e))??;

                info!("Enqueueing {} accounts", accounts.len());
                for account in accounts {
                    dispatcher.enqueue(account.user_id).await?;
                }
                if once {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, draining queued jobs");
                break;
            }
        }
    }

    let stats = dispatcher.shutdown().await;
    info!(
        "Finished: {} completed, {} skipped, {} not ready, {} unknown, {} failed",
        stats.completed, stats.skipped, stats.not_ready, stats.unknown, stats.failed
    );
    Ok(())
}

async fn sync_once(app: App, user_id: String) -> Result<()> {
    let engine = app.engine.clone();
    let outcome = tokio::task::spawn_blocking(move || engine.run_cycle(&user_id))
        .await
        .map_err(|e| anyhow!("Sync task failed: {}", e))??;

    match outcome {
        CycleOutcome::Completed(report) => {
            println!(
                "{}",
                serde_json::json!({
                    "processed": report.processed,
                    "created": report.upsert.messages_created,
                    "skipped": report.upsert.skipped,
                    "deleted": report.deleted,
                    "initialized": report.initialized,
                    "durationMs": report.duration_ms,
                })
            );
        }
        CycleOutcome::Skipped => println!("sync already running, skipped"),
        CycleOutcome::NotReady => println!("mailbox not ready yet, try again later"),
        CycleOutcome::UnknownUser => println!("no account registered for this user"),
    }
    Ok(())
}

fn register(
    app: &App,
    user_id: &str,
    account_id: &str,
    access_token: &str,
    days_within: u32,
) -> Result<()> {
    // Cursors survive a credential refresh for the same remote account
    let account = match app.store.get_account(user_id)? {
        Some(existing) if existing.account_id == account_id => Account {
            access_token: access_token.to_string(),
            days_within,
            ..existing
        },
        _ => Account::new(user_id, account_id, access_token).with_days_within(days_within),
    };

    app.store.upsert_account(&account)?;
    info!("Registered {} ({})", user_id, account_id);
    Ok(())
}

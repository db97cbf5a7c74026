//! Sync orchestrator
//!
//! One cycle for one user:
//!
//! ```text
//! lock -> (initialize cursors) -> updated feed -> upsert
//!      -> deleted feed -> reconcile -> save cursors -> status -> unlock
//! ```
//!
//! Status moves `idle -> running -> done | error`. Losing the lock race
//! leaves the status untouched and is not an error. A panic inside the
//! locked section is recorded as an `error` status before the lock goes.

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, error, info, warn};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::feed::{fetch_deleted, fetch_updated};
use super::reconcile::reconcile_deletions;
use super::upsert::{UpsertStats, upsert_records};
use crate::config::Settings;
use crate::coordination::{CoordinationStore, ExclusivityLock, StatusBoard};
use crate::models::{Account, SyncStatus};
use crate::provider::MailProvider;
use crate::storage::MailStore;

/// How long to wait for the provider to prepare a new mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl InitPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            attempts: settings.provider.init_ready_attempts.max(1),
            interval: settings.provider.init_ready_interval(),
        }
    }
}

/// Result of one completed cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Records committed by the upserter
    pub processed: usize,
    pub upsert: UpsertStats,
    /// Messages removed by the deleted feed
    pub deleted: usize,
    pub updated_cursor: String,
    pub deleted_cursor: String,
    /// Cursors were handed out by the provider during this cycle
    pub initialized: bool,
    pub duration_ms: u64,
}

/// How a cycle ended, short of an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle holds the account's lock
    Skipped,
    /// No account is registered for the user; retrying cannot help
    UnknownUser,
    /// The provider never reported the mailbox ready
    NotReady,
    Completed(CycleReport),
}

/// Drives sync cycles against one provider, store and coordination space
pub struct SyncEngine {
    provider: Arc<dyn MailProvider>,
    store: Arc<dyn MailStore>,
    lock: ExclusivityLock,
    status: StatusBoard,
    init: InitPolicy,
}

impl SyncEngine {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        store: Arc<dyn MailStore>,
        coordination: Arc<dyn CoordinationStore>,
        settings: &Settings,
    ) -> Self {
        Self {
            provider,
            store,
            lock: ExclusivityLock::new(coordination.clone(), settings.lock.ttl()),
            status: StatusBoard::new(coordination),
            init: InitPolicy::from_settings(settings),
        }
    }

    /// Override the readiness polling, e.g. to avoid sleeping in tests
    pub fn with_init_policy(mut self, init: InitPolicy) -> Self {
        self.init = init;
        self
    }

    pub fn store(&self) -> &Arc<dyn MailStore> {
        &self.store
    }

    /// Last published status for a user
    pub fn status(&self, user_id: &str) -> Result<SyncStatus> {
        self.status.get(user_id)
    }

    /// Run one cycle for `user_id`.
    ///
    /// Errors inside the cycle are written to the status record and then
    /// returned, so the caller's retry policy decides what happens next.
    /// The lock is released on every path.
    pub fn run_cycle(&self, user_id: &str) -> Result<CycleOutcome> {
        let Some(account) = self.store.get_account(user_id)? else {
            warn!("[SYNC] No account registered for {}, nothing to sync", user_id);
            return Ok(CycleOutcome::UnknownUser);
        };

        let Some(guard) = self.lock.try_hold(&account.account_id)? else {
            info!("[SYNC] Sync already running for {}, skipping", user_id);
            return Ok(CycleOutcome::Skipped);
        };

        self.status.set(user_id, &SyncStatus::running())?;
        info!(
            "[SYNC] Starting cycle for {} (account {})",
            user_id,
            guard.account_id()
        );

        // the guard outlives the unwind so the status is written while locked
        let result =
            catch_unwind(AssertUnwindSafe(|| self.run_locked(&account))).unwrap_or_else(|payload| {
                Err(anyhow!("sync cycle panicked: {}", panic_message(payload.as_ref())))
            });

        match result {
            Ok(CycleOutcome::Completed(report)) => {
                info!(
                    "[SYNC] Cycle for {} done: {} processed, {} deleted in {}ms",
                    user_id, report.processed, report.deleted, report.duration_ms
                );
                self.status.set(user_id, &SyncStatus::done(report.processed))?;
                Ok(CycleOutcome::Completed(report))
            }
            Ok(outcome) => {
                self.status.set(user_id, &SyncStatus::idle())?;
                Ok(outcome)
            }
            Err(e) => {
                error!("[SYNC] Cycle for {} failed: {:#}", user_id, e);
                if let Err(status_err) = self
                    .status
                    .set(user_id, &SyncStatus::failed(format!("{:#}", e)))
                {
                    warn!("[SYNC] Could not record failure for {}: {:#}", user_id, status_err);
                }
                Err(e)
            }
        }
    }

    fn run_locked(&self, account: &Account) -> Result<CycleOutcome> {
        let start = Instant::now();
        let token = account.access_token.as_str();

        let (updated_start, deleted_start, initialized) = match (
            account.updated_cursor.as_deref(),
            account.deleted_cursor.as_deref(),
        ) {
            (Some(updated), Some(deleted)) => (updated.to_string(), deleted.to_string(), false),
            _ => {
                let Some((updated, deleted)) = self.initialize(account)? else {
                    return Ok(CycleOutcome::NotReady);
                };
                (updated, deleted, true)
            }
        };

        let updated = fetch_updated(self.provider.as_ref(), token, &updated_start)
            .context("Failed to read the updated feed")?;
        if !updated.advanced_from(&updated_start) {
            debug!("[SYNC] Updated feed for {} did not move", account.user_id);
        }
        let upsert = upsert_records(
            self.provider.as_ref(),
            self.store.as_ref(),
            token,
            updated.records,
        );

        let deleted_feed = fetch_deleted(self.provider.as_ref(), token, &deleted_start)
            .context("Failed to read the deleted feed")?;
        let deleted = reconcile_deletions(self.store.as_ref(), deleted_feed.records)
            .context("Failed to apply deletions")?;

        self.store
            .save_cursors(
                &account.user_id,
                Some(&updated.cursor),
                Some(&deleted_feed.cursor),
            )
            .context("Failed to save cursors")?;

        Ok(CycleOutcome::Completed(CycleReport {
            processed: upsert.processed,
            upsert,
            deleted,
            updated_cursor: updated.cursor,
            deleted_cursor: deleted_feed.cursor,
            initialized,
            duration_ms: start.elapsed().as_millis() as u64,
        }))
    }

    /// Ask the provider for starting cursors, polling until it is ready.
    ///
    /// The cursors are saved straight away so a crash later in the cycle
    /// resumes from them instead of initializing again.
    fn initialize(&self, account: &Account) -> Result<Option<(String, String)>> {
        for attempt in 1..=self.init.attempts {
            let response = self
                .provider
                .start_sync(&account.access_token, account.days_within)
                .context("Failed to initialize sync")?;

            if response.ready {
                let (Some(updated), Some(deleted)) =
                    (response.sync_updated_token, response.sync_deleted_token)
                else {
                    bail!("provider reported ready without both sync tokens");
                };
                self.store
                    .save_cursors(&account.user_id, Some(&updated), Some(&deleted))
                    .context("Failed to save initial cursors")?;
                info!("[SYNC] Initialized cursors for {}", account.user_id);
                return Ok(Some((updated, deleted)));
            }

            if attempt < self.init.attempts {
                info!(
                    "[SYNC] Mailbox for {} not ready (attempt {}/{}), waiting {:?}",
                    account.user_id, attempt, self.init.attempts, self.init.interval
                );
                std::thread::sleep(self.init.interval);
            }
        }

        warn!(
            "[SYNC] Mailbox for {} still not ready after {} attempts",
            account.user_id, self.init.attempts
        );
        Ok(None)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

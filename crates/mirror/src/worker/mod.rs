//! Job dispatcher
//!
//! Sync jobs are pushed into a bounded queue and consumed by a fixed pool of
//! worker tasks. Each job runs one orchestrator cycle on the blocking pool.
//!
//! ```text
//! enqueue(user) ──► mpsc queue ──► worker 0..N ──► spawn_blocking(run_cycle)
//!                                      │
//!                                      └── error: wait job_retry_delay, retry
//! ```
//!
//! A cycle that loses the lock race, finds the mailbox not ready or names an
//! unregistered user finishes the job without a retry. Dropping the queue's
//! sender lets the workers drain what is left and exit.

use anyhow::{Result, anyhow};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::config::WorkerSettings;
use crate::sync::{CycleOutcome, SyncEngine};

/// One request to sync one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub user_id: String,
}

impl Job {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Counters of finished jobs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub completed: usize,
    pub skipped: usize,
    pub not_ready: usize,
    /// Jobs for users with no registered account
    pub unknown: usize,
    /// Jobs that exhausted their attempts or panicked
    pub failed: usize,
    /// Cycle attempts beyond the first
    pub retries: usize,
}

#[derive(Default)]
struct Counters {
    completed: AtomicUsize,
    skipped: AtomicUsize,
    not_ready: AtomicUsize,
    unknown: AtomicUsize,
    failed: AtomicUsize,
    retries: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            completed: self.completed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            not_ready: self.not_ready.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPlan {
    max_attempts: u32,
    delay: Duration,
}

/// Handle to the worker pool
///
/// Must be started from within a tokio runtime.
pub struct Dispatcher {
    sender: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl Dispatcher {
    /// Spawn `settings.workers` workers sharing one queue
    pub fn start(engine: Arc<SyncEngine>, settings: &WorkerSettings) -> Self {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(Counters::default());
        let plan = RetryPlan {
            max_attempts: settings.max_job_attempts.max(1),
            delay: settings.job_retry_delay(),
        };

        let workers = (0..settings.workers.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    engine.clone(),
                    receiver.clone(),
                    counters.clone(),
                    plan,
                ))
            })
            .collect::<Vec<_>>();

        info!("[WORKER] Dispatcher started with {} workers", workers.len());
        Self {
            sender,
            workers,
            counters,
        }
    }

    /// Queue a sync for `user_id`, waiting while the queue is full
    pub async fn enqueue(&self, user_id: impl Into<String>) -> Result<()> {
        let job = Job::new(user_id);
        debug!("[WORKER] Enqueueing {}", job.user_id);
        self.sender
            .send(job)
            .await
            .map_err(|e| anyhow!("Job queue closed, dropped job for {}", e.0.user_id))
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// Stop accepting jobs, finish the queued ones, and wait for the workers
    pub async fn shutdown(self) -> DispatchStats {
        let Self {
            sender,
            workers,
            counters,
        } = self;
        drop(sender);

        for handle in workers {
            if let Err(e) = handle.await {
                error!("[WORKER] Worker task ended abnormally: {}", e);
            }
        }

        let stats = counters.snapshot();
        info!("[WORKER] Dispatcher stopped: {:?}", stats);
        stats
    }
}

async fn worker_loop(
    id: usize,
    engine: Arc<SyncEngine>,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    counters: Arc<Counters>,
    plan: RetryPlan,
) {
    debug!("[WORKER] Worker {} ready", id);
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(job) = next else {
            break;
        };
        process(id, &engine, &counters, plan, job).await;
    }
    debug!("[WORKER] Worker {} exiting", id);
}

async fn process(
    id: usize,
    engine: &Arc<SyncEngine>,
    counters: &Counters,
    plan: RetryPlan,
    job: Job,
) {
    for attempt in 1..=plan.max_attempts {
        if attempt > 1 {
            counters.retries.fetch_add(1, Ordering::Relaxed);
        }

        let cycle_engine = engine.clone();
        let user_id = job.user_id.clone();
        let result =
            tokio::task::spawn_blocking(move || cycle_engine.run_cycle(&user_id)).await;

        match result {
            Ok(Ok(CycleOutcome::Completed(report))) => {
                debug!(
                    "[WORKER] Worker {} finished {} ({} processed)",
                    id, job.user_id, report.processed
                );
                counters.completed.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Ok(Ok(CycleOutcome::Skipped)) => {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Ok(Ok(CycleOutcome::NotReady)) => {
                counters.not_ready.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Ok(Ok(CycleOutcome::UnknownUser)) => {
                counters.unknown.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Ok(Err(e)) if attempt < plan.max_attempts => {
                warn!(
                    "[WORKER] Sync for {} failed (attempt {}/{}), retrying in {:?}: {:#}",
                    job.user_id, attempt, plan.max_attempts, plan.delay, e
                );
                tokio::time::sleep(plan.delay).await;
            }
            Ok(Err(e)) => {
                error!(
                    "[WORKER] Giving up on {} after {} attempts: {:#}",
                    job.user_id, plan.max_attempts, e
                );
                counters.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(join_error) => {
                // the engine records panics under the lock; one escaping here
                // happened outside it, so the status belongs to someone else
                error!("[WORKER] Sync for {} panicked: {}", job.user_id, join_error);
                counters.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::coordination::{CoordinationStore, InMemoryCoordination, StatusBoard, lock_key};
    use crate::models::{Account, MessageId, SyncState, SyncStatus};
    use crate::provider::api::{DeletedRecord, EmailRecord, FeedPage, SyncStartResponse};
    use crate::provider::{FeedPosition, MailProvider};
    use crate::storage::{InMemoryMailStore, MailStore};
    use crate::sync::InitPolicy;
    use crate::sync::testing::{FakeProvider, record};
    use crate::transport::TransportError;

    fn worker_settings(workers: usize) -> WorkerSettings {
        WorkerSettings {
            workers,
            queue_capacity: 8,
            max_job_attempts: 3,
            job_retry_delay_ms: 0,
            poll_interval_secs: 1,
        }
    }

    fn engine_with(
        provider: Arc<dyn MailProvider>,
        store: Arc<InMemoryMailStore>,
        coordination: Arc<InMemoryCoordination>,
    ) -> Arc<SyncEngine> {
        Arc::new(
            SyncEngine::new(provider, store, coordination, &Settings::default()).with_init_policy(
                InitPolicy {
                    attempts: 1,
                    interval: Duration::ZERO,
                },
            ),
        )
    }

    #[tokio::test]
    async fn test_jobs_run_and_drain_on_shutdown() {
        let provider = Arc::new(FakeProvider::new());
        let store = Arc::new(InMemoryMailStore::new());
        let coordination = Arc::new(InMemoryCoordination::new());
        for user in ["ann", "ben"] {
            store
                .upsert_account(
                    &Account::new(user, format!("acc-{}", user), "tok")
                        .with_cursors(Some("A"), Some("D")),
                )
                .unwrap();
        }
        provider.updated(
            "delta:A",
            FeedPage::new(vec![record("m1", "t1", "a@x.io", &[], "2024-06-20T10:00:00Z")]),
        );

        let engine = engine_with(provider.clone(), store.clone(), coordination);
        let dispatcher = Dispatcher::start(engine.clone(), &worker_settings(2));
        dispatcher.enqueue("ann").await.unwrap();
        dispatcher.enqueue("ben").await.unwrap();

        let stats = dispatcher.shutdown().await;
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(engine.status("ann").unwrap().state, SyncState::Done);
        assert_eq!(engine.status("ben").unwrap().processed, 1);
        assert_eq!(store.count_messages().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failing_cycle_is_retried_then_given_up() {
        let provider = Arc::new(FakeProvider::new());
        let store = Arc::new(InMemoryMailStore::new());
        let coordination = Arc::new(InMemoryCoordination::new());
        store
            .upsert_account(&Account::new("ann", "acc", "tok").with_cursors(Some("A"), Some("D")))
            .unwrap();
        provider.fail(
            "updated:delta:A",
            TransportError::Status {
                status: 400,
                body: "bad cursor".to_string(),
            },
        );

        let engine = engine_with(provider.clone(), store, coordination);
        let dispatcher = Dispatcher::start(engine.clone(), &worker_settings(1));
        dispatcher.enqueue("ann").await.unwrap();

        let stats = dispatcher.shutdown().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retries, 2);
        assert_eq!(provider.calls().len(), 3);
        assert_eq!(engine.status("ann").unwrap().state, SyncState::Error);
    }

    #[tokio::test]
    async fn test_held_lock_counts_as_skipped() {
        let provider = Arc::new(FakeProvider::new());
        let store = Arc::new(InMemoryMailStore::new());
        let coordination = Arc::new(InMemoryCoordination::new());
        store
            .upsert_account(&Account::new("ann", "acc", "tok").with_cursors(Some("A"), Some("D")))
            .unwrap();
        coordination
            .set_nx_ex(&lock_key("acc"), "elsewhere", Duration::from_secs(60))
            .unwrap();

        let engine = engine_with(provider.clone(), store, coordination);
        let dispatcher = Dispatcher::start(engine, &worker_settings(1));
        dispatcher.enqueue("ann").await.unwrap();

        let stats = dispatcher.shutdown().await;
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.retries, 0);
        assert!(provider.calls().is_empty());
    }

    struct PanickingProvider;

    impl MailProvider for PanickingProvider {
        fn start_sync(&self, _: &str, _: u32) -> Result<SyncStartResponse, TransportError> {
            panic!("provider exploded");
        }

        fn fetch_updated(
            &self,
            _: &str,
            _: FeedPosition<'_>,
        ) -> Result<FeedPage<EmailRecord>, TransportError> {
            panic!("provider exploded");
        }

        fn fetch_deleted(
            &self,
            _: &str,
            _: FeedPosition<'_>,
        ) -> Result<FeedPage<DeletedRecord>, TransportError> {
            panic!("provider exploded");
        }

        fn fetch_message(&self, _: &str, _: &MessageId) -> Result<EmailRecord, TransportError> {
            panic!("provider exploded");
        }
    }

    #[tokio::test]
    async fn test_panicking_cycle_records_error_and_frees_lock() {
        let store = Arc::new(InMemoryMailStore::new());
        let coordination = Arc::new(InMemoryCoordination::new());
        store
            .upsert_account(&Account::new("ann", "acc", "tok").with_cursors(Some("A"), Some("D")))
            .unwrap();

        let engine = engine_with(Arc::new(PanickingProvider), store, coordination.clone());
        let dispatcher = Dispatcher::start(engine.clone(), &worker_settings(1));
        dispatcher.enqueue("ann").await.unwrap();

        let stats = dispatcher.shutdown().await;
        assert_eq!(stats.failed, 1);
        let status = engine.status("ann").unwrap();
        assert_eq!(status.state, SyncState::Error);
        assert!(status.error.unwrap().contains("panicked"));
        assert!(coordination.get(&lock_key("acc")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_retried() {
        let provider = Arc::new(FakeProvider::new());
        let engine = engine_with(
            provider.clone(),
            Arc::new(InMemoryMailStore::new()),
            Arc::new(InMemoryCoordination::new()),
        );
        let dispatcher = Dispatcher::start(engine, &worker_settings(1));
        dispatcher.enqueue("ghost").await.unwrap();

        let stats = dispatcher.shutdown().await;
        assert_eq!(stats.unknown, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.retries, 0);
        assert!(provider.calls().is_empty());
    }

    /// Coordination whose lock acquisition panics
    struct BrokenLocks(Arc<InMemoryCoordination>);

    impl CoordinationStore for BrokenLocks {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.0.set(key, value)
        }

        fn set_nx_ex(&self, _: &str, _: &str, _: Duration) -> Result<bool> {
            panic!("lock backend exploded");
        }

        fn delete(&self, key: &str) -> Result<bool> {
            self.0.delete(key)
        }
    }

    #[tokio::test]
    async fn test_panic_before_lock_leaves_status_alone() {
        let store = Arc::new(InMemoryMailStore::new());
        let inner = Arc::new(InMemoryCoordination::new());
        store
            .upsert_account(&Account::new("ann", "acc", "tok").with_cursors(Some("A"), Some("D")))
            .unwrap();
        // another worker is mid-cycle
        let board = StatusBoard::new(inner.clone());
        board.set("ann", &SyncStatus::running()).unwrap();

        let engine = Arc::new(SyncEngine::new(
            Arc::new(FakeProvider::new()),
            store,
            Arc::new(BrokenLocks(inner)),
            &Settings::default(),
        ));
        let dispatcher = Dispatcher::start(engine, &worker_settings(1));
        dispatcher.enqueue("ann").await.unwrap();

        let stats = dispatcher.shutdown().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retries, 0);
        assert_eq!(board.get("ann").unwrap().state, SyncState::Running);
    }
}

//! Per-account exclusivity lock

use anyhow::Result;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use super::CoordinationStore;

/// Key guarding sync cycles of one account
pub fn lock_key(account_id: &str) -> String {
    format!("locks:sync:{}", account_id)
}

/// TTL-based mutex keyed by account id
///
/// `acquire` never waits: a held key means another cycle is in flight. The
/// TTL lets a crashed holder's lock lapse instead of blocking the account
/// forever.
#[derive(Clone)]
pub struct ExclusivityLock {
    store: Arc<dyn CoordinationStore>,
    ttl: Duration,
}

impl ExclusivityLock {
    pub fn new(store: Arc<dyn CoordinationStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Try to take the lock. Returns false if someone else holds it.
    pub fn acquire(&self, account_id: &str) -> Result<bool> {
        let holder = format!("pid:{}@{}", std::process::id(), Utc::now().to_rfc3339());
        let acquired = self.store.set_nx_ex(&lock_key(account_id), &holder, self.ttl)?;
        if acquired {
            debug!("[LOCK] Acquired {} for {:?}", lock_key(account_id), self.ttl);
        } else {
            info!("[LOCK] {} is held by another cycle", lock_key(account_id));
        }
        Ok(acquired)
    }

    /// Drop the lock, whoever holds it
    pub fn release(&self, account_id: &str) -> Result<()> {
        self.store.delete(&lock_key(account_id))?;
        debug!("[LOCK] Released {}", lock_key(account_id));
        Ok(())
    }

    /// Acquire and hand back a guard that releases on drop, including unwinds
    pub fn try_hold(&self, account_id: &str) -> Result<Option<LockGuard>> {
        if !self.acquire(account_id)? {
            return Ok(None);
        }
        Ok(Some(LockGuard {
            lock: self.clone(),
            account_id: account_id.to_string(),
        }))
    }
}

/// Held lock; released when dropped
pub struct LockGuard {
    lock: ExclusivityLock,
    account_id: String,
}

impl LockGuard {
    pub fn account_id(&self) -> &str {
        &self.account_id
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release(&self.account_id) {
            // the TTL still bounds how long the key can linger
            warn!("[LOCK] Failed to release {}: {:#}", lock_key(&self.account_id), e);
        }
    }
}

//! Published sync status per user

use anyhow::{Context, Result};
use std::sync::Arc;

use super::CoordinationStore;
use crate::models::SyncStatus;

/// Key holding the status record of one user
pub fn status_key(user_id: &str) -> String {
    format!("sync:status:{}", user_id)
}

/// Reads and writes JSON-encoded [`SyncStatus`] records
#[derive(Clone)]
pub struct StatusBoard {
    store: Arc<dyn CoordinationStore>,
}

impl StatusBoard {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Last published status; users that never synced read as idle
    pub fn get(&self, user_id: &str) -> Result<SyncStatus> {
        let Some(raw) = self.store.get(&status_key(user_id))? else {
            return Ok(SyncStatus::idle());
        };
        serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt status record for {}", user_id))
    }

    pub fn set(&self, user_id: &str, status: &SyncStatus) -> Result<()> {
        let raw = serde_json::to_string(status).context("Failed to encode status")?;
        self.store.set(&status_key(user_id), &raw)
    }
}

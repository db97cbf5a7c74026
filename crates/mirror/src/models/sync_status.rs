//! Status record published for every sync cycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a user's sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Idle,
    Running,
    Done,
    Error,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncState::Idle => "idle",
            SyncState::Running => "running",
            SyncState::Done => "done",
            SyncState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Last published status for one user
///
/// Written only by the orchestrator; read by whatever reports progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    /// Records committed in the current or last cycle
    #[serde(default)]
    pub processed: usize,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncStatus {
    /// Status shown for users that never synced
    pub fn idle() -> Self {
        Self::at(SyncState::Idle, 0)
    }

    pub fn running() -> Self {
        Self::at(SyncState::Running, 0)
    }

    pub fn done(processed: usize) -> Self {
        Self::at(SyncState::Done, processed)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::at(SyncState::Error, 0)
        }
    }

    fn at(state: SyncState, processed: usize) -> Self {
        Self {
            state,
            processed,
            updated_at: Utc::now(),
            error: None,
        }
    }
}

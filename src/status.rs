//! ==============================================================================
//! status.rs - shared status store
//! ==============================================================================
//!
//! purpose:
//!     single-slot "current" view shared between:
//!     - the acquisition loop (sole writer of readings and state)
//!     - the web server (reads snapshots, flips `enabled`)
//!
//! everything sits behind ONE mutex so a reader can never see a reading from
//! one poll paired with the state of another. the lock is only held to copy
//! or replace the snapshot, never across io.
//!
//! relationships:
//!     - written by: acquisition.rs
//!     - read by: server.rs, acquisition.rs (enabled flag)
//!
//! ==============================================================================

use crate::domain::{OperatingState, Reading};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone, Debug, PartialEq)]
pub struct StatusSnapshot {
    pub last_reading: Option<Reading>,
    pub state: OperatingState,
    /// cleared by POST /toggle; the loop stops reading while false
    pub enabled: bool,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self { last_reading: None, state: OperatingState::Initializing, enabled: true }
    }
}

/// clone-able handle; all clones share the same slot
#[derive(Clone, Default)]
pub struct SharedStatus {
    inner: Arc<Mutex<StatusSnapshot>>,
}

impl SharedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        self.inner.lock().await.clone()
    }

    /// store a new reading and mark the sensor active in one step
    pub async fn publish(&self, reading: Reading) {
        let mut guard = self.inner.lock().await;
        guard.last_reading = Some(reading);
        guard.state = OperatingState::Active;
    }

    pub async fn set_state(&self, state: OperatingState) {
        self.inner.lock().await.state = state;
    }

    /// a newly bound session starts from initializing with reading enabled
    pub async fn begin_session(&self) {
        let mut guard = self.inner.lock().await;
        guard.state = OperatingState::Initializing;
        guard.enabled = true;
    }

    pub async fn is_enabled(&self) -> bool {
        self.inner.lock().await.enabled
    }

    /// flip `enabled`, returning the new value
    pub async fn toggle(&self) -> bool {
        let mut guard = self.inner.lock().await;
        guard.enabled = !guard.enabled;
        guard.enabled
    }
}

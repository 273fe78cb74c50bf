//! ==============================================================================
//! session.rs - who is allowed to operate the sensor
//! ==============================================================================
//!
//! purpose:
//!     the device is leased to one owner at a time through a session document
//!     in the remote store. this module reads and writes that lease.
//!
//! lease rules:
//!     - a session is live while `active` and heartbeats are < timeout old
//!     - expiry is lazy: nothing sweeps old sessions, every read re-evaluates
//!       liveness through Session::is_live and nothing caches the answer
//!     - claim() refuses while ANOTHER owner holds a live session
//!
//! policies:
//!     - RemoteSessions    -> backed by the document store
//!     - StandaloneSession -> no remote at all; always valid for a fixed owner
//!
//! relationships:
//!     - used by: acquisition.rs (every tick), main.rs (construction)
//!     - uses: store (DocumentStore)
//!
//! ==============================================================================

use crate::domain::{DeviceId, Session};
use crate::store::DocumentStore;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;

#[async_trait]
pub trait SessionPolicy: Send + Sync {
    /// the live session for `device`, if any
    async fn active_session(&self, device: &DeviceId) -> Option<Session>;

    /// true iff a live session exists and belongs to `expected_owner`
    async fn validate(&self, device: &DeviceId, expected_owner: &str) -> bool {
        match self.active_session(device).await {
            Some(session) if session.owner_id == expected_owner => true,
            Some(session) => {
                tracing::error!(
                    "session owner mismatch: expected {}, got {}",
                    expected_owner,
                    session.owner_id
                );
                false
            }
            None => false,
        }
    }

    async fn heartbeat(&self, device: &DeviceId) -> bool;

    async fn claim(&self, device: &DeviceId, owner: &str, scope: &str) -> bool;

    /// advertise that the device is waiting for an owner; never fails
    async fn announce_waiting(&self, device: &DeviceId);
}

// ==============================================================================
// remote sessions
// ==============================================================================

pub struct RemoteSessions {
    store: Arc<dyn DocumentStore>,
    sessions_collection: String,
    waiting_collection: String,
    timeout: Duration,
}

impl RemoteSessions {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        sessions_collection: impl Into<String>,
        waiting_collection: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            sessions_collection: sessions_collection.into(),
            waiting_collection: waiting_collection.into(),
            timeout,
        }
    }

    /// the stored session regardless of liveness
    async fn fetch(&self, device: &DeviceId) -> Result<Option<Session>, crate::store::StoreError> {
        match self.store.get(&self.sessions_collection, device.as_str()).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SessionPolicy for RemoteSessions {
    async fn active_session(&self, device: &DeviceId) -> Option<Session> {
        let session = match self.fetch(device).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::debug!("no session found for sensor {}", device);
                return None;
            }
            Err(e) => {
                tracing::error!("failed to get session: {}", e);
                return None;
            }
        };

        if !session.active {
            tracing::debug!("session for {} is not active", device);
            return None;
        }

        let now = Utc::now();
        if !session.is_live(now, self.timeout) {
            if let Some(beat) = session.last_heartbeat {
                let age = now - beat;
                tracing::warn!(
                    "session for {} expired ({:.1} minutes old)",
                    device,
                    age.num_seconds() as f64 / 60.0
                );
            }
            return None;
        }

        Some(session)
    }

    async fn heartbeat(&self, device: &DeviceId) -> bool {
        let fields = json!({ "lastHeartbeat": Utc::now() });
        match self.store.update(&self.sessions_collection, device.as_str(), fields).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("failed to update heartbeat: {}", e);
                false
            }
        }
    }

    async fn claim(&self, device: &DeviceId, owner: &str, scope: &str) -> bool {
        let now = Utc::now();

        match self.fetch(device).await {
            Ok(Some(existing))
                if existing.owner_id != owner && existing.is_live(now, self.timeout) =>
            {
                tracing::error!("sensor claimed by another user: {}", existing.owner_id);
                return false;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("failed to create session: {}", e);
                return false;
            }
        }

        let doc = match serde_json::to_value(Session::claimed(owner, scope, now)) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::error!("failed to encode session: {}", e);
                return false;
            }
        };

        match self.store.set(&self.sessions_collection, device.as_str(), doc).await {
            Ok(()) => {
                tracing::info!("created new session for {}", device);
                true
            }
            Err(e) => {
                tracing::error!("failed to create session: {}", e);
                false
            }
        }
    }

    async fn announce_waiting(&self, device: &DeviceId) {
        let doc = json!({
            "hardwareId": device.as_str(),
            "status": "waiting",
            "lastSeen": Utc::now(),
            "deviceInfo": {
                "platform": std::env::consts::OS,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        match self.store.set(&self.waiting_collection, device.as_str(), doc).await {
            Ok(()) => tracing::info!("announced presence as {} - waiting for app...", device),
            Err(e) => tracing::error!("failed to announce: {}", e),
        }
    }
}

// ==============================================================================
// standalone
// ==============================================================================
// no remote store: the session layer collapses to "always valid, fixed owner"

pub struct StandaloneSession {
    owner: String,
    scope: String,
}

impl StandaloneSession {
    pub fn new(owner: impl Into<String>, scope: impl Into<String>) -> Self {
        Self { owner: owner.into(), scope: scope.into() }
    }
}

#[async_trait]
impl SessionPolicy for StandaloneSession {
    async fn active_session(&self, _device: &DeviceId) -> Option<Session> {
        Some(Session {
            owner_id: self.owner.clone(),
            scope_id: self.scope.clone(),
            active: true,
            claimed_at: None,
            last_heartbeat: None,
        })
    }

    async fn heartbeat(&self, _device: &DeviceId) -> bool {
        true
    }

    async fn claim(&self, _device: &DeviceId, owner: &str, _scope: &str) -> bool {
        owner == self.owner
    }

    async fn announce_waiting(&self, _device: &DeviceId) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryDocumentStore;

    const SESSIONS: &str = "sensor_sessions";
    const WAITING: &str = "unassigned_sensors";

    fn setup() -> (Arc<MemoryDocumentStore>, RemoteSessions, DeviceId) {
        let store = Arc::new(MemoryDocumentStore::new());
        let sessions = RemoteSessions::new(store.clone(), SESSIONS, WAITING, Duration::minutes(10));
        (store, sessions, DeviceId::new("SOIL_A1"))
    }

    fn stored_session(
        store: &MemoryDocumentStore,
        owner: &str,
        active: bool,
        beat_minutes_ago: i64,
    ) {
        let beat = Utc::now() - Duration::minutes(beat_minutes_ago);
        let doc = json!({
            "userId": owner,
            "fieldId": "field-7",
            "active": active,
            "claimedAt": beat,
            "lastHeartbeat": beat,
        });
        store.put(SESSIONS, "SOIL_A1", doc);
    }

    #[tokio::test]
    async fn absent_session_is_none() {
        let (_, sessions, device) = setup();
        assert!(sessions.active_session(&device).await.is_none());
    }

    #[tokio::test]
    async fn inactive_or_expired_sessions_are_none() {
        let (store, sessions, device) = setup();
        stored_session(&store, "alice", false, 0);
        assert!(sessions.active_session(&device).await.is_none());

        stored_session(&store, "alice", true, 11);
        assert!(sessions.active_session(&device).await.is_none());

        stored_session(&store, "alice", true, 2);
        let s = sessions.active_session(&device).await.unwrap();
        assert_eq!(s.owner_id, "alice");
        assert_eq!(s.scope_id, "field-7");
    }

    #[tokio::test]
    async fn validate_rejects_other_owner() {
        let (store, sessions, device) = setup();
        stored_session(&store, "alice", true, 0);
        assert!(sessions.validate(&device, "alice").await);
        assert!(!sessions.validate(&device, "bob").await);
    }

    #[tokio::test]
    async fn store_failure_reads_as_no_session() {
        let (store, sessions, device) = setup();
        stored_session(&store, "alice", true, 0);
        store.set_offline(true);
        assert!(!sessions.validate(&device, "alice").await);
    }

    #[tokio::test]
    async fn claim_refused_while_other_owner_is_live() {
        let (store, sessions, device) = setup();
        stored_session(&store, "alice", true, 3);
        assert!(!sessions.claim(&device, "bob", "south").await);
        assert_eq!(store.doc(SESSIONS, "SOIL_A1").unwrap()["userId"], "alice");
    }

    #[tokio::test]
    async fn claim_takes_over_expired_session() {
        let (store, sessions, device) = setup();
        stored_session(&store, "alice", true, 30);
        assert!(sessions.claim(&device, "bob", "south").await);

        let s = sessions.active_session(&device).await.unwrap();
        assert_eq!(s.owner_id, "bob");
        assert_eq!(s.scope_id, "south");
        assert!(s.claimed_at.is_some());
    }

    #[tokio::test]
    async fn same_owner_may_reclaim() {
        let (store, sessions, device) = setup();
        stored_session(&store, "alice", true, 1);
        assert!(sessions.claim(&device, "alice", "north").await);
        assert_eq!(store.doc(SESSIONS, "SOIL_A1").unwrap()["fieldId"], "north");
    }

    #[tokio::test]
    async fn heartbeat_refreshes_timestamp() {
        let (store, sessions, device) = setup();
        stored_session(&store, "alice", true, 9);
        assert!(sessions.heartbeat(&device).await);

        let s = sessions.active_session(&device).await.unwrap();
        let age = Utc::now() - s.last_heartbeat.unwrap();
        assert!(age < Duration::minutes(1));
    }

    #[tokio::test]
    async fn heartbeat_without_session_fails_softly() {
        let (_, sessions, device) = setup();
        assert!(!sessions.heartbeat(&device).await);
    }

    #[tokio::test]
    async fn announce_upserts_waiting_entry() {
        let (store, sessions, device) = setup();
        sessions.announce_waiting(&device).await;
        sessions.announce_waiting(&device).await;

        let doc = store.doc(WAITING, "SOIL_A1").unwrap();
        assert_eq!(doc["hardwareId"], "SOIL_A1");
        assert_eq!(doc["status"], "waiting");

        store.set_offline(true);
        sessions.announce_waiting(&device).await;
    }

    #[tokio::test]
    async fn standalone_is_always_valid_for_its_owner() {
        let policy = StandaloneSession::new("local", "bench");
        let device = DeviceId::new("SOIL_A1");
        assert!(policy.validate(&device, "local").await);
        assert!(!policy.validate(&device, "someone-else").await);
        assert!(policy.heartbeat(&device).await);
        assert_eq!(policy.active_session(&device).await.unwrap().scope_id, "bench");
    }
}

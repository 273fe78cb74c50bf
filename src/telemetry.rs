//! ==============================================================================
//! telemetry.rs - relay readings to the remote store
//! ==============================================================================
//!
//! purpose:
//!     after every successful poll the acquisition loop hands the reading here:
//!     1. overwrite the device's "latest reading" document
//!     2. append the reading to its history subcollection
//!
//! offline buffering:
//!     history entries that could not be uploaded are kept in a small fifo
//!     (MAX_OFFLINE_BUFFER, oldest dropped first) and replayed before the next
//!     upload once the store answers again. delivery is at-least-zero, not
//!     exactly-once.
//!
//! ==============================================================================

use crate::domain::{DeviceId, Reading};
use crate::store::{DocumentStore, StoreError};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;

pub const MAX_OFFLINE_BUFFER: usize = 50;

/// owner/scope a running acquisition is bound to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub owner: String,
    pub scope: String,
}

pub struct Telemetry {
    store: Arc<dyn DocumentStore>,
    readings_collection: String,
    history_subcollection: String,
    backlog: VecDeque<Value>,
}

impl Telemetry {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        readings_collection: impl Into<String>,
        history_subcollection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            readings_collection: readings_collection.into(),
            history_subcollection: history_subcollection.into(),
            backlog: VecDeque::new(),
        }
    }

    #[cfg(test)]
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// best-effort upload; true when both documents were written
    pub async fn upload(
        &mut self,
        device: &DeviceId,
        binding: &Binding,
        reading: &Reading,
    ) -> bool {
        let entry = history_entry(binding, reading);

        let result = self.try_upload(device, binding, reading, &entry).await;
        match result {
            Ok(()) => {
                tracing::info!("data uploaded to {}/{}", self.readings_collection, device);
                true
            }
            Err(e) => {
                tracing::error!("failed to upload reading: {}", e);
                self.buffer(entry);
                false
            }
        }
    }

    async fn try_upload(
        &mut self,
        device: &DeviceId,
        binding: &Binding,
        reading: &Reading,
        entry: &Value,
    ) -> Result<(), StoreError> {
        let latest = latest_document(device, binding, reading);
        self.store.set(&self.readings_collection, device.as_str(), latest).await?;

        self.flush_backlog(device).await?;

        self.store
            .append(
                &self.readings_collection,
                device.as_str(),
                &self.history_subcollection,
                entry.clone(),
            )
            .await?;
        Ok(())
    }

    async fn flush_backlog(&mut self, device: &DeviceId) -> Result<(), StoreError> {
        if !self.backlog.is_empty() {
            tracing::info!("replaying {} buffered readings", self.backlog.len());
        }
        while let Some(entry) = self.backlog.front() {
            self.store
                .append(
                    &self.readings_collection,
                    device.as_str(),
                    &self.history_subcollection,
                    entry.clone(),
                )
                .await?;
            self.backlog.pop_front();
        }
        Ok(())
    }

    fn buffer(&mut self, entry: Value) {
        if self.backlog.len() >= MAX_OFFLINE_BUFFER {
            self.backlog.pop_front();
        }
        self.backlog.push_back(entry);
    }
}

fn latest_document(device: &DeviceId, binding: &Binding, reading: &Reading) -> Value {
    let mut doc = history_entry(binding, reading);
    doc["hardwareId"] = json!(device.as_str());
    doc
}

fn history_entry(binding: &Binding, reading: &Reading) -> Value {
    json!({
        "userId": binding.owner,
        "fieldId": binding.scope,
        "moisture": reading.moisture,
        "temperature": reading.temperature,
        "moisture_status": reading.moisture_status.label(),
        "temp_status": reading.temp_status.label(),
        "timestamp": reading.captured_at,
    })
}

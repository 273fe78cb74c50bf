//! in-process document store for tests

use super::{DocumentStore, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<HashMap<String, Value>>,
    history: Mutex<HashMap<String, Vec<Value>>>,
    offline: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// make every call fail with `Unavailable` until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn doc(&self, collection: &str, id: &str) -> Option<Value> {
        self.docs.lock().unwrap().get(&key(collection, id)).cloned()
    }

    pub fn put(&self, collection: &str, id: &str, doc: Value) {
        self.docs.lock().unwrap().insert(key(collection, id), doc);
    }

    pub fn history(&self, collection: &str, id: &str, subcollection: &str) -> Vec<Value> {
        self.history
            .lock()
            .unwrap()
            .get(&format!("{}/{}", key(collection, id), subcollection))
            .cloned()
            .unwrap_or_default()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

fn key(collection: &str, id: &str) -> String {
    format!("{}/{}", collection, id)
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        self.check_online()?;
        Ok(self.doc(collection, id))
    }

    async fn set(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError> {
        self.check_online()?;
        self.put(collection, id, doc);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), StoreError> {
        self.check_online()?;
        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .get_mut(&key(collection, id))
            .ok_or_else(|| StoreError::NotFound(key(collection, id)))?;
        if let (Some(target), Value::Object(fields)) = (doc.as_object_mut(), fields) {
            target.extend(fields);
        }
        Ok(())
    }

    async fn append(
        &self,
        collection: &str,
        id: &str,
        subcollection: &str,
        doc: Value,
    ) -> Result<String, StoreError> {
        self.check_online()?;
        let mut history = self.history.lock().unwrap();
        let entries = history
            .entry(format!("{}/{}", key(collection, id), subcollection))
            .or_default();
        entries.push(doc);
        Ok(entries.len().to_string())
    }
}

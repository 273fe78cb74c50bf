//! ==============================================================================
//! store - remote document store
//! ==============================================================================
//!
//! purpose:
//!     the remote side of the agent: a generic key/document store addressed by
//!     collection + document id. the agent only needs four operations:
//!     - get     (session lookups)
//!     - set     (claims, latest reading, waiting registry upsert)
//!     - update  (heartbeat field merge)
//!     - append  (readings history subcollection)
//!
//! every call is fallible and best-effort. callers (session.rs, telemetry.rs)
//! catch StoreError, log it, and carry on.
//!
//! backends:
//!     - http.rs   -> REST store over reqwest (production)
//!     - memory.rs -> in-process map (tests)
//!
//! ==============================================================================

pub mod http;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use http::HttpDocumentStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("document {0} not found")]
    NotFound(String),

    #[error("malformed document: {0}")]
    Decode(#[from] serde_json::Error),

    #[allow(dead_code)]
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// create or overwrite the whole document
    async fn set(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError>;

    /// merge top-level fields into an existing document
    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), StoreError>;

    /// add a document to `collection/id/subcollection`, returning its id
    async fn append(
        &self,
        collection: &str,
        id: &str,
        subcollection: &str,
        doc: Value,
    ) -> Result<String, StoreError>;
}

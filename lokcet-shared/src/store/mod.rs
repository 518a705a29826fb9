//! Collection-oriented document storage.
//!
//! Documents are JSON objects addressed by `collection/id`. Multi-document
//! writes go through [`WriteBatch`] and are applied atomically by every
//! backend. Watches yield the current value first and then again after every
//! committed batch touching the watched document or collection.

mod changes;
mod document;
mod memory;
mod postgres;
mod query;

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use changes::ChangeFeed;
pub use document::{to_document, FieldUpdate, Precondition, WriteBatch, WriteOp};
pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;
pub use query::{Direction, Filter, Query};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn doc(&self, id: impl Into<String>) -> DocPath {
        DocPath {
            collection: self.clone(),
            id: id.into(),
        }
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocPath {
    pub collection: CollectionPath,
    pub id: String,
}

impl DocPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: CollectionPath::new(collection),
            id: id.into(),
        }
    }

    /// A collection nested under this document, e.g. `chatrooms/<id>/messages`.
    pub fn sub_collection(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{}/{}", self.collection, self.id, name))
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(DocPath),

    #[error("document already exists: {0}")]
    AlreadyExists(DocPath),

    #[error("precondition failed: {0}")]
    PreconditionFailed(DocPath),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A document as read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: DocPath,
    pub data: Value,
}

impl Snapshot {
    pub fn id(&self) -> &str {
        &self.path.id
    }

    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

pub type WatchStream<T> = BoxStream<'static, StoreResult<T>>;

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Allocates a fresh document ID without writing anything.
    fn new_id(&self) -> String {
        Uuid::now_v7().simple().to_string()
    }

    async fn get(&self, path: &DocPath) -> StoreResult<Option<Snapshot>>;

    async fn query(&self, query: &Query) -> StoreResult<Vec<Snapshot>>;

    async fn count(&self, query: &Query) -> StoreResult<u64> {
        Ok(self.query(query).await?.len() as u64)
    }

    /// Applies every operation of the batch, or none of them.
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    fn watch_document(&self, path: DocPath) -> WatchStream<Option<Snapshot>>;

    fn watch_query(&self, query: Query) -> WatchStream<Vec<Snapshot>>;

    async fn set(&self, path: &DocPath, data: Value) -> StoreResult<()> {
        self.commit(WriteBatch::new().set(path.clone(), data)).await
    }

    async fn merge(&self, path: &DocPath, data: Value) -> StoreResult<()> {
        self.commit(WriteBatch::new().merge(path.clone(), data)).await
    }

    async fn create(&self, path: &DocPath, data: Value) -> StoreResult<()> {
        self.commit(WriteBatch::new().create(path.clone(), data)).await
    }

    async fn update(&self, path: &DocPath, updates: Vec<FieldUpdate>) -> StoreResult<()> {
        self.commit(WriteBatch::new().update(path.clone(), updates)).await
    }

    async fn delete(&self, path: &DocPath) -> StoreResult<()> {
        self.commit(WriteBatch::new().delete(path.clone())).await
    }
}

/// Typed reads on top of [`DocumentStore`].
#[async_trait]
pub trait DocumentStoreExt: DocumentStore {
    async fn get_as<T>(&self, path: &DocPath) -> StoreResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(path).await? {
            Some(snapshot) => Ok(Some(snapshot.decode()?)),
            None => Ok(None),
        }
    }

    async fn query_as<T>(&self, query: &Query) -> StoreResult<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.query(query)
            .await?
            .iter()
            .map(Snapshot::decode)
            .collect()
    }
}

impl<S: DocumentStore + ?Sized> DocumentStoreExt for S {}

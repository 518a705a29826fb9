use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use super::changes::{self, ChangeFeed};
use super::{DocPath, DocumentStore, Query, Snapshot, StoreResult, WatchStream, WriteBatch};

/// Process-local document store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    docs: RwLock<BTreeMap<DocPath, Value>>,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live document and query watches.
    pub fn watcher_count(&self) -> usize {
        self.inner.feed.watcher_count()
    }

    pub async fn len(&self) -> usize {
        self.inner.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.docs.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Snapshot>> {
        let docs = self.inner.docs.read().await;
        Ok(docs.get(path).map(|data| Snapshot {
            path: path.clone(),
            data: data.clone(),
        }))
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Snapshot>> {
        let docs = self.inner.docs.read().await;
        let candidates = docs
            .iter()
            .filter(|(path, _)| path.collection == query.collection)
            .map(|(path, data)| Snapshot {
                path: path.clone(),
                data: data.clone(),
            });
        Ok(query.evaluate(candidates))
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let now_ms = Utc::now().timestamp_millis();
        let mut docs = self.inner.docs.write().await;

        // Stage every op first so a failing op leaves the map untouched.
        let mut staged: BTreeMap<DocPath, Option<Value>> = BTreeMap::new();
        for op in batch.ops() {
            let path = op.path();
            let current = match staged.get(path) {
                Some(value) => value.clone(),
                None => docs.get(path).cloned(),
            };
            let next = op.apply(current, now_ms)?;
            staged.insert(path.clone(), next);
        }

        for (path, value) in staged {
            match value {
                Some(data) => {
                    docs.insert(path, data);
                }
                None => {
                    docs.remove(&path);
                }
            }
        }
        drop(docs);

        self.inner.feed.publish(batch.paths());
        Ok(())
    }

    fn watch_document(&self, path: DocPath) -> WatchStream<Option<Snapshot>> {
        changes::watch_document(self.clone(), &self.inner.feed, path)
    }

    fn watch_query(&self, query: Query) -> WatchStream<Vec<Snapshot>> {
        changes::watch_query(self.clone(), &self.inner.feed, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CollectionPath, DocumentStoreExt, FieldUpdate, Precondition, StoreError};
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn failed_batch_applies_nothing() {
        let store = MemoryStore::new();
        let a = DocPath::new("users", "a");
        let b = DocPath::new("users", "b");
        store.set(&a, json!({"friends": []})).await.unwrap();

        let batch = WriteBatch::new()
            .update(a.clone(), vec![FieldUpdate::array_union("friends", ["b"])])
            .update(b.clone(), vec![FieldUpdate::array_union("friends", ["a"])]);
        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(p) if p == b));

        let a_doc = store.get(&a).await.unwrap().unwrap();
        assert_eq!(a_doc.data, json!({"friends": []}));
    }

    #[tokio::test]
    async fn failed_precondition_rolls_back_the_batch() {
        let store = MemoryStore::new();
        let a = DocPath::new("users", "a");
        let b = DocPath::new("users", "b");
        store.set(&a, json!({"friendWaitList": []})).await.unwrap();
        store.set(&b, json!({"friendRequests": ["a"]})).await.unwrap();

        let batch = WriteBatch::new()
            .update(a.clone(), vec![FieldUpdate::array_union("friendWaitList", ["b"])])
            .require(b.clone(), Precondition::array_lacks("friendRequests", "a"));
        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed(p) if p == b));
        assert_eq!(store.get(&a).await.unwrap().unwrap().data, json!({"friendWaitList": []}));
    }

    #[tokio::test]
    async fn later_ops_see_earlier_ops_in_same_batch() {
        let store = MemoryStore::new();
        let a = DocPath::new("images", "a");
        let batch = WriteBatch::new()
            .set(a.clone(), json!({"id": ""}))
            .update(a.clone(), vec![FieldUpdate::set("id", "a")]);
        store.commit(batch).await.unwrap();
        let doc: Value = store.get_as(&a).await.unwrap().unwrap();
        assert_eq!(doc["id"], "a");
    }

    #[tokio::test]
    async fn document_watch_emits_current_then_changes() {
        let store = MemoryStore::new();
        let path = DocPath::new("users", "a");
        store.set(&path, json!({"n": 1})).await.unwrap();

        let mut watch = store.watch_document(path.clone());
        let first = watch.next().await.unwrap().unwrap().unwrap();
        assert_eq!(first.data["n"], 1);

        store.update(&path, vec![FieldUpdate::set("n", 2)]).await.unwrap();
        let second = watch.next().await.unwrap().unwrap().unwrap();
        assert_eq!(second.data["n"], 2);

        store.delete(&path).await.unwrap();
        assert!(watch.next().await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn query_watch_ignores_other_collections() {
        let store = MemoryStore::new();
        let query = Query::new(CollectionPath::new("images"));
        let mut watch = store.watch_query(query);
        assert!(watch.next().await.unwrap().unwrap().is_empty());

        store.set(&DocPath::new("users", "x"), json!({})).await.unwrap();
        store.set(&DocPath::new("images", "i"), json!({})).await.unwrap();
        let next = watch.next().await.unwrap().unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id(), "i");
    }

    #[tokio::test]
    async fn dropping_a_watch_deregisters_it() {
        let store = MemoryStore::new();
        let watch = store.watch_document(DocPath::new("users", "a"));
        assert_eq!(store.watcher_count(), 1);
        drop(watch);
        assert_eq!(store.watcher_count(), 0);
    }

    #[tokio::test]
    async fn sub_collections_are_isolated() {
        let store = MemoryStore::new();
        let room = DocPath::new("chatrooms", "a_b");
        let messages = room.sub_collection("messages");
        store.set(&messages.doc("m1"), json!({"content": "hi"})).await.unwrap();
        store.set(&DocPath::new("chatrooms", "a_c"), json!({})).await.unwrap();

        assert_eq!(store.count(&Query::new(messages)).await.unwrap(), 1);
        assert_eq!(store.count(&Query::new(CollectionPath::new("chatrooms"))).await.unwrap(), 1);
    }
}

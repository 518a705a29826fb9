use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::{DocPath, DocumentStore, Query, Snapshot, WatchStream};

const FEED_CAPACITY: usize = 1024;

/// In-process fan-out of committed batches. One message per commit carrying
/// every path the batch touched.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<Arc<Vec<DocPath>>>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, paths: Vec<DocPath>) {
        if paths.is_empty() {
            return;
        }
        // No receivers is not an error: nobody is watching.
        let _ = self.tx.send(Arc::new(paths));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<DocPath>>> {
        self.tx.subscribe()
    }

    /// Number of live watches.
    pub fn watcher_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub(crate) fn watch_document<S>(store: S, feed: &ChangeFeed, path: DocPath) -> WatchStream<Option<Snapshot>>
where
    S: DocumentStore + Clone,
{
    // Subscribe before the first read so no commit falls between the two.
    let mut rx = feed.subscribe();
    Box::pin(async_stream::stream! {
        yield store.get(&path).await;
        loop {
            match rx.recv().await {
                Ok(paths) => {
                    if paths.contains(&path) {
                        yield store.get(&path).await;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(path = %path, skipped, "document watch lagged, re-reading");
                    yield store.get(&path).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub(crate) fn watch_query<S>(store: S, feed: &ChangeFeed, query: Query) -> WatchStream<Vec<Snapshot>>
where
    S: DocumentStore + Clone,
{
    let mut rx = feed.subscribe();
    Box::pin(async_stream::stream! {
        yield store.query(&query).await;
        loop {
            match rx.recv().await {
                Ok(paths) => {
                    if paths.iter().any(|p| p.collection == query.collection) {
                        yield store.query(&query).await;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(collection = %query.collection, skipped, "query watch lagged, re-running");
                    yield store.query(&query).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

//! Registry of per-key watches merged into one aggregate view.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::store::{Snapshot, StoreResult};

/// Decodes one document watch emission for a [`WatchSet`]. A missing
/// document, a read error or a decode error all drop the entry; errors are
/// logged.
pub fn watched_value<T: DeserializeOwned>(emission: StoreResult<Option<Snapshot>>) -> Option<T> {
    match emission {
        Ok(Some(snapshot)) => match snapshot.decode() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(path = %snapshot.path, error = %e, "undecodable document in watch");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "document watch failed");
            None
        }
    }
}

/// Owns one forwarding task per key. Each task emits `Some(value)` to insert
/// or replace the key's entry and `None` to drop it. Every task is aborted
/// when its key is removed or the set is dropped.
pub struct WatchSet<K, V> {
    tasks: HashMap<K, (u64, JoinHandle<()>)>,
    generation: u64,
    tx: mpsc::UnboundedSender<(K, u64, Option<V>)>,
    rx: mpsc::UnboundedReceiver<(K, u64, Option<V>)>,
    view: BTreeMap<K, V>,
}

impl<K, V> Default for WatchSet<K, V>
where
    K: Ord + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> WatchSet<K, V>
where
    K: Ord + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tasks: HashMap::new(),
            generation: 0,
            tx,
            rx,
            view: BTreeMap::new(),
        }
    }

    /// Starts watching `key`, replacing any previous watch on it.
    pub fn insert<S>(&mut self, key: K, stream: S)
    where
        S: Stream<Item = Option<V>> + Send + 'static,
    {
        self.remove(&key);
        self.generation += 1;
        let generation = self.generation;
        let tx = self.tx.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(value) = stream.next().await {
                if tx.send((task_key.clone(), generation, value)).is_err() {
                    break;
                }
            }
        });
        self.tasks.insert(key, (generation, handle));
    }

    pub fn contains(&self, key: &K) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn remove(&mut self, key: &K) {
        if let Some((_, handle)) = self.tasks.remove(key) {
            handle.abort();
        }
        self.view.remove(key);
    }

    /// Drops every watch whose key fails the predicate.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        let stale: Vec<K> = self.tasks.keys().filter(|k| !keep(k)).cloned().collect();
        for key in stale {
            self.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn view(&self) -> &BTreeMap<K, V> {
        &self.view
    }

    /// Waits for the next emission, folds every queued emission into the
    /// view and returns it. Returns `None` immediately when nothing is
    /// watched.
    pub async fn next(&mut self) -> Option<&BTreeMap<K, V>> {
        if self.tasks.is_empty() {
            return None;
        }
        let (key, generation, value) = self.rx.recv().await?;
        self.apply(key, generation, value);
        while let Ok((key, generation, value)) = self.rx.try_recv() {
            self.apply(key, generation, value);
        }
        Some(&self.view)
    }

    fn apply(&mut self, key: K, generation: u64, value: Option<V>) {
        // Emissions from a replaced or removed watch are stale.
        match self.tasks.get(&key) {
            Some((current, _)) if *current == generation => {}
            _ => return,
        }
        match value {
            Some(value) => {
                self.view.insert(key, value);
            }
            None => {
                self.view.remove(&key);
            }
        }
    }
}

impl<K, V> Drop for WatchSet<K, V> {
    fn drop(&mut self) {
        for (_, (_, handle)) in self.tasks.drain() {
            handle.abort();
        }
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;
use serde_json::Value;

use super::changes::{self, ChangeFeed};
use super::{DocPath, DocumentStore, Query, Snapshot, StoreError, StoreResult, WatchStream, WriteBatch, WriteOp};
use crate::clients::db::DbPool;

diesel::table! {
    documents (collection, id) {
        collection -> Text,
        id -> Text,
        data -> Jsonb,
        updated_at -> Timestamptz,
    }
}

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (collection, id)
)";

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
struct NewDocument {
    collection: String,
    id: String,
    data: Value,
    updated_at: DateTime<Utc>,
}

/// Documents persisted as JSONB rows in PostgreSQL.
///
/// Filters are evaluated in process over the rows of one collection. Change
/// notifications only reach watches opened through the same instance.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: DbPool,
    feed: ChangeFeed,
}

impl PgDocumentStore {
    pub async fn connect(pool: DbPool) -> StoreResult<Self> {
        let store = Self {
            pool,
            feed: ChangeFeed::new(),
        };
        store
            .run(|conn| {
                diesel::sql_query(CREATE_TABLE).execute(conn)?;
                Ok(())
            })
            .await?;
        tracing::info!("document table ready");
        Ok(store)
    }

    async fn run<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| StoreError::Backend(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {e}")))?
    }
}

fn read_for_update(conn: &mut PgConnection, path: &DocPath) -> StoreResult<Option<Value>> {
    let data = documents::table
        .filter(documents::collection.eq(path.collection.as_str()))
        .filter(documents::id.eq(path.id.as_str()))
        .select(documents::data)
        .for_update()
        .first::<Value>(conn)
        .optional()?;
    Ok(data)
}

fn write(conn: &mut PgConnection, path: &DocPath, value: Option<Value>) -> StoreResult<()> {
    match value {
        Some(data) => {
            let row = NewDocument {
                collection: path.collection.as_str().to_string(),
                id: path.id.clone(),
                data,
                updated_at: Utc::now(),
            };
            diesel::insert_into(documents::table)
                .values(&row)
                .on_conflict((documents::collection, documents::id))
                .do_update()
                .set((
                    documents::data.eq(excluded(documents::data)),
                    documents::updated_at.eq(excluded(documents::updated_at)),
                ))
                .execute(conn)?;
        }
        None => {
            diesel::delete(
                documents::table
                    .filter(documents::collection.eq(path.collection.as_str()))
                    .filter(documents::id.eq(path.id.as_str())),
            )
            .execute(conn)?;
        }
    }
    Ok(())
}

fn apply_batch(conn: &mut PgConnection, ops: &[WriteOp]) -> StoreResult<()> {
    let now_ms = Utc::now().timestamp_millis();
    conn.transaction::<_, StoreError, _>(|conn| {
        for op in ops {
            let current = match op {
                WriteOp::Set { .. } | WriteOp::Delete { .. } => None,
                _ => read_for_update(conn, op.path())?,
            };
            let next = op.apply(current, now_ms)?;
            if !matches!(op, WriteOp::Require { .. }) {
                write(conn, op.path(), next)?;
            }
        }
        Ok(())
    })
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Snapshot>> {
        let path = path.clone();
        self.run(move |conn| {
            let data = documents::table
                .filter(documents::collection.eq(path.collection.as_str()))
                .filter(documents::id.eq(path.id.as_str()))
                .select(documents::data)
                .first::<Value>(conn)
                .optional()?;
            Ok(data.map(|data| Snapshot { path, data }))
        })
        .await
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Snapshot>> {
        let query = query.clone();
        self.run(move |conn| {
            let rows = documents::table
                .filter(documents::collection.eq(query.collection.as_str()))
                .select((documents::id, documents::data))
                .load::<(String, Value)>(conn)?;
            let snapshots = rows.into_iter().map(|(id, data)| Snapshot {
                path: query.collection.doc(id),
                data,
            });
            Ok(query.evaluate(snapshots))
        })
        .await
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let paths = batch.paths();
        self.run(move |conn| apply_batch(conn, batch.ops())).await?;
        self.feed.publish(paths);
        Ok(())
    }

    fn watch_document(&self, path: DocPath) -> WatchStream<Option<Snapshot>> {
        changes::watch_document(self.clone(), &self.feed, path)
    }

    fn watch_query(&self, query: Query) -> WatchStream<Vec<Snapshot>> {
        changes::watch_query(self.clone(), &self.feed, query)
    }
}

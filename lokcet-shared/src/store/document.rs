use serde::Serialize;
use serde_json::{Map, Value};

use super::{DocPath, StoreError, StoreResult};

/// Serializes a model into a storable JSON object.
pub fn to_document<T: Serialize>(value: &T) -> StoreResult<Value> {
    let doc = serde_json::to_value(value)?;
    if !doc.is_object() {
        return Err(StoreError::InvalidDocument("document must be a JSON object".into()));
    }
    Ok(doc)
}

/// A partial update of one top-level field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set(String, Value),
    Delete(String),
    /// Appends each value not already present, preserving order.
    ArrayUnion(String, Vec<Value>),
    /// Removes every element equal to one of the values.
    ArrayRemove(String, Vec<Value>),
    /// Sets the field to the commit time in epoch milliseconds.
    ServerTimestamp(String),
    Increment(String, i64),
}

impl FieldUpdate {
    pub fn set(field: &str, value: impl Into<Value>) -> Self {
        Self::Set(field.to_string(), value.into())
    }

    pub fn delete(field: &str) -> Self {
        Self::Delete(field.to_string())
    }

    pub fn array_union<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self::ArrayUnion(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn array_remove<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self::ArrayRemove(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn server_timestamp(field: &str) -> Self {
        Self::ServerTimestamp(field.to_string())
    }

    pub fn increment(field: &str, by: i64) -> Self {
        Self::Increment(field.to_string(), by)
    }

    fn apply(&self, doc: &mut Map<String, Value>, now_ms: i64) {
        match self {
            Self::Set(field, value) => {
                doc.insert(field.clone(), value.clone());
            }
            Self::Delete(field) => {
                doc.remove(field);
            }
            Self::ArrayUnion(field, values) => {
                let entry = doc.entry(field.clone()).or_insert_with(|| Value::Array(Vec::new()));
                if !entry.is_array() {
                    *entry = Value::Array(Vec::new());
                }
                if let Value::Array(items) = entry {
                    for value in values {
                        if !items.contains(value) {
                            items.push(value.clone());
                        }
                    }
                }
            }
            Self::ArrayRemove(field, values) => {
                if let Some(Value::Array(items)) = doc.get_mut(field) {
                    items.retain(|item| !values.contains(item));
                }
            }
            Self::ServerTimestamp(field) => {
                doc.insert(field.clone(), Value::from(now_ms));
            }
            Self::Increment(field, by) => {
                let current = doc.get(field).and_then(Value::as_i64).unwrap_or(0);
                doc.insert(field.clone(), Value::from(current + by));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Overwrites the whole document, creating it if missing.
    Set { path: DocPath, data: Value },
    /// Writes the given top-level fields, creating the document if missing.
    Merge { path: DocPath, data: Value },
    /// Fails with `AlreadyExists` if the document is present.
    Create { path: DocPath, data: Value },
    /// Fails with `NotFound` if the document is missing.
    Update { path: DocPath, updates: Vec<FieldUpdate> },
    Delete { path: DocPath },
    /// Checks `condition` against the committed document and writes nothing.
    Require { path: DocPath, condition: Precondition },
}

/// A condition checked inside a batch, so a decision made on an earlier read
/// cannot be committed against a document that has since changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// Fails with `NotFound` if the document is missing.
    Exists,
    /// Fails with `PreconditionFailed` if the array field holds the value.
    /// A missing document or field passes.
    ArrayLacks(String, Value),
}

impl Precondition {
    pub fn array_lacks(field: &str, value: impl Into<Value>) -> Self {
        Self::ArrayLacks(field.to_string(), value.into())
    }

    fn check(&self, path: &DocPath, current: Option<&Value>) -> StoreResult<()> {
        match self {
            Self::Exists if current.is_none() => Err(StoreError::NotFound(path.clone())),
            Self::Exists => Ok(()),
            Self::ArrayLacks(field, value) => {
                let present = current
                    .and_then(|doc| doc.get(field))
                    .and_then(Value::as_array)
                    .is_some_and(|items| items.contains(value));
                if present {
                    Err(StoreError::PreconditionFailed(path.clone()))
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl WriteOp {
    pub fn path(&self) -> &DocPath {
        match self {
            Self::Set { path, .. }
            | Self::Merge { path, .. }
            | Self::Create { path, .. }
            | Self::Update { path, .. }
            | Self::Delete { path }
            | Self::Require { path, .. } => path,
        }
    }

    /// Computes the document that results from applying this operation to
    /// `current`. `None` means the document does not exist afterwards.
    pub(crate) fn apply(&self, current: Option<Value>, now_ms: i64) -> StoreResult<Option<Value>> {
        match self {
            Self::Set { data, .. } => Ok(Some(object(data)?.clone())),
            Self::Merge { data, .. } => {
                let mut doc = match current {
                    Some(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                if let Value::Object(fields) = object(data)? {
                    for (key, value) in fields {
                        doc.insert(key.clone(), value.clone());
                    }
                }
                Ok(Some(Value::Object(doc)))
            }
            Self::Create { path, data } => match current {
                Some(_) => Err(StoreError::AlreadyExists(path.clone())),
                None => Ok(Some(object(data)?.clone())),
            },
            Self::Update { path, updates } => {
                let mut doc = match current {
                    Some(Value::Object(map)) => map,
                    Some(_) => return Err(StoreError::InvalidDocument(format!("{path} is not an object"))),
                    None => return Err(StoreError::NotFound(path.clone())),
                };
                for update in updates {
                    update.apply(&mut doc, now_ms);
                }
                Ok(Some(Value::Object(doc)))
            }
            Self::Delete { .. } => Ok(None),
            Self::Require { path, condition } => {
                condition.check(path, current.as_ref())?;
                Ok(current)
            }
        }
    }
}

fn object(data: &Value) -> StoreResult<&Value> {
    if data.is_object() {
        Ok(data)
    } else {
        Err(StoreError::InvalidDocument("document must be a JSON object".into()))
    }
}

/// An ordered group of writes committed atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: DocPath, data: Value) -> Self {
        self.ops.push(WriteOp::Set { path, data });
        self
    }

    pub fn merge(mut self, path: DocPath, data: Value) -> Self {
        self.ops.push(WriteOp::Merge { path, data });
        self
    }

    pub fn create(mut self, path: DocPath, data: Value) -> Self {
        self.ops.push(WriteOp::Create { path, data });
        self
    }

    pub fn update(mut self, path: DocPath, updates: Vec<FieldUpdate>) -> Self {
        self.ops.push(WriteOp::Update { path, updates });
        self
    }

    pub fn delete(mut self, path: DocPath) -> Self {
        self.ops.push(WriteOp::Delete { path });
        self
    }

    pub fn require(mut self, path: DocPath, condition: Precondition) -> Self {
        self.ops.push(WriteOp::Require { path, condition });
        self
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    /// Appends every op of `other` after this batch's ops.
    pub fn extend(mut self, other: WriteBatch) -> Self {
        self.ops.extend(other.ops);
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Distinct paths written by the batch, in first-touch order.
    pub fn paths(&self) -> Vec<DocPath> {
        let mut paths: Vec<DocPath> = Vec::new();
        for op in &self.ops {
            if matches!(op, WriteOp::Require { .. }) {
                continue;
            }
            if !paths.contains(op.path()) {
                paths.push(op.path().clone());
            }
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path() -> DocPath {
        DocPath::new("users", "a")
    }

    #[test]
    fn array_union_skips_present_values() {
        let op = WriteOp::Update {
            path: path(),
            updates: vec![FieldUpdate::array_union("friends", ["b", "c"])],
        };
        let out = op.apply(Some(json!({"friends": ["b"]})), 0).unwrap().unwrap();
        assert_eq!(out["friends"], json!(["b", "c"]));
    }

    #[test]
    fn array_remove_drops_all_matches() {
        let op = WriteOp::Update {
            path: path(),
            updates: vec![FieldUpdate::array_remove("friends", ["b"])],
        };
        let out = op.apply(Some(json!({"friends": ["b", "c", "b"]})), 0).unwrap().unwrap();
        assert_eq!(out["friends"], json!(["c"]));
    }

    #[test]
    fn update_on_missing_document_fails() {
        let op = WriteOp::Update {
            path: path(),
            updates: vec![FieldUpdate::set("x", 1)],
        };
        assert!(matches!(op.apply(None, 0), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn create_refuses_existing_document() {
        let op = WriteOp::Create { path: path(), data: json!({"x": 1}) };
        assert!(matches!(op.apply(Some(json!({})), 0), Err(StoreError::AlreadyExists(_))));
        assert_eq!(op.apply(None, 0).unwrap(), Some(json!({"x": 1})));
    }

    #[test]
    fn merge_keeps_untouched_fields() {
        let op = WriteOp::Merge { path: path(), data: json!({"b": 2}) };
        let out = op.apply(Some(json!({"a": 1})), 0).unwrap().unwrap();
        assert_eq!(out, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn server_timestamp_and_increment() {
        let op = WriteOp::Update {
            path: path(),
            updates: vec![
                FieldUpdate::server_timestamp("time"),
                FieldUpdate::increment("count", 2),
            ],
        };
        let out = op.apply(Some(json!({"count": 1})), 42).unwrap().unwrap();
        assert_eq!(out, json!({"count": 3, "time": 42}));
    }

    #[test]
    fn require_checks_without_writing() {
        let doc = json!({"friendRequests": ["b"]});
        let lacks_c = WriteOp::Require { path: path(), condition: Precondition::array_lacks("friendRequests", "c") };
        assert_eq!(lacks_c.apply(Some(doc.clone()), 0).unwrap(), Some(doc.clone()));
        assert_eq!(lacks_c.apply(None, 0).unwrap(), None);

        let lacks_b = WriteOp::Require { path: path(), condition: Precondition::array_lacks("friendRequests", "b") };
        assert!(matches!(lacks_b.apply(Some(doc), 0), Err(StoreError::PreconditionFailed(_))));

        let exists = WriteOp::Require { path: path(), condition: Precondition::Exists };
        assert!(matches!(exists.apply(None, 0), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn required_paths_are_not_reported_as_written() {
        let batch = WriteBatch::new()
            .require(DocPath::new("rooms", "r"), Precondition::Exists)
            .set(path(), json!({}));
        assert_eq!(batch.paths(), vec![path()]);
    }

    #[test]
    fn non_object_documents_are_rejected() {
        assert!(to_document(&vec![1, 2]).is_err());
        let op = WriteOp::Set { path: path(), data: json!("text") };
        assert!(matches!(op.apply(None, 0), Err(StoreError::InvalidDocument(_))));
    }
}

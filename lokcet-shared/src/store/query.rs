use std::cmp::Ordering;

use serde_json::Value;

use super::{CollectionPath, Snapshot};

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    ArrayContains(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    /// A document missing the field never matches.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::Eq(field, expected) => doc.get(field).is_some_and(|v| values_equal(v, expected)),
            Self::ArrayContains(field, expected) => doc
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.iter().any(|v| values_equal(v, expected))),
            Self::Gt(field, bound) => compare_field(doc, field, bound) == Some(Ordering::Greater),
            Self::Gte(field, bound) => matches!(
                compare_field(doc, field, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Lt(field, bound) => compare_field(doc, field, bound) == Some(Ordering::Less),
            Self::Lte(field, bound) => matches!(
                compare_field(doc, field, bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::In(field, options) => doc
                .get(field)
                .is_some_and(|v| options.iter().any(|o| values_equal(v, o))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: CollectionPath,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn where_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.to_string(), value.into()))
    }

    pub fn array_contains(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::ArrayContains(field.to_string(), value.into()))
    }

    pub fn where_gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gt(field.to_string(), value.into()))
    }

    pub fn where_in<V: Into<Value>>(self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.filter(Filter::In(field.to_string(), values.into_iter().map(Into::into).collect()))
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        if let Some((field, _)) = &self.order_by {
            // Ordering on a field excludes documents that lack it.
            if doc.get(field).is_none() {
                return false;
            }
        }
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Filters, sorts and truncates snapshots of this query's collection.
    pub fn evaluate(&self, docs: impl IntoIterator<Item = Snapshot>) -> Vec<Snapshot> {
        let mut out: Vec<Snapshot> = docs
            .into_iter()
            .filter(|s| s.path.collection == self.collection && self.matches(&s.data))
            .collect();

        match &self.order_by {
            Some((field, direction)) => out.sort_by(|a, b| {
                let ord = match (a.data.get(field), b.data.get(field)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                };
                let ord = ord.then_with(|| a.path.id.cmp(&b.path.id));
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            }),
            None => out.sort_by(|a, b| a.path.id.cmp(&b.path.id)),
        }

        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

fn compare_field(doc: &Value, field: &str, bound: &Value) -> Option<Ordering> {
    doc.get(field).and_then(|v| compare_values(v, bound))
}

/// Values of different JSON kinds are incomparable.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocPath;
    use serde_json::json;

    fn snap(id: &str, data: Value) -> Snapshot {
        Snapshot {
            path: DocPath::new("images", id),
            data,
        }
    }

    #[test]
    fn filters_and_orders_descending() {
        let docs = vec![
            snap("a", json!({"owner": "u1", "createdAt": 10})),
            snap("b", json!({"owner": "u1", "createdAt": 30})),
            snap("c", json!({"owner": "u2", "createdAt": 20})),
            snap("d", json!({"owner": "u1"})),
        ];
        let query = Query::new(CollectionPath::new("images"))
            .where_eq("owner", "u1")
            .order_by("createdAt", Direction::Descending);
        let ids: Vec<_> = query.evaluate(docs).into_iter().map(|s| s.path.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn range_and_array_filters() {
        let doc = json!({"createdAt": 5, "visibleUserIds": ["x", "y"]});
        assert!(Filter::Gt("createdAt".into(), json!(4)).matches(&doc));
        assert!(!Filter::Gt("createdAt".into(), json!(5)).matches(&doc));
        assert!(Filter::Lte("createdAt".into(), json!(5)).matches(&doc));
        assert!(Filter::ArrayContains("visibleUserIds".into(), json!("y")).matches(&doc));
        assert!(!Filter::ArrayContains("visibleUserIds".into(), json!("z")).matches(&doc));
        assert!(Filter::In("createdAt".into(), vec![json!(1), json!(5)]).matches(&doc));
    }

    #[test]
    fn mixed_kinds_never_match() {
        let doc = json!({"createdAt": "5"});
        assert!(!Filter::Gt("createdAt".into(), json!(1)).matches(&doc));
        assert!(!Filter::Eq("createdAt".into(), json!(5)).matches(&doc));
        assert!(!Filter::Eq("missing".into(), Value::Null).matches(&doc));
    }

    #[test]
    fn integer_and_float_compare_numerically() {
        let doc = json!({"lat": 1});
        assert!(Filter::Eq("lat".into(), json!(1.0)).matches(&doc));
    }

    #[test]
    fn limit_truncates_after_sorting() {
        let docs = vec![
            snap("a", json!({"t": 1})),
            snap("b", json!({"t": 3})),
            snap("c", json!({"t": 2})),
        ];
        let query = Query::new(CollectionPath::new("images"))
            .order_by("t", Direction::Descending)
            .limit(1);
        let out = query.evaluate(docs);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path.id, "b");
    }
}

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::record::Record;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Not ready: {0}")]
    NotReady(String),
    #[error("Malformed local entry at '{key}': {reason}")]
    MalformedEntry {
        key: String,
        reason: String,
    },
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
    #[error("Unknown module '{0}'")]
    UnknownModule(String),
}

impl StorageError {
    /// The error class that moves a tenant-scoped fetch into its fallback phase.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }

    /// Short label for metrics and logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotReady(_) => "not_ready",
            Self::MalformedEntry { .. } => "malformed_entry",
            Self::Unavailable(_) => "unavailable",
            Self::UnknownModule(_) => "unknown_module",
        }
    }
}

/// Comparison operator of a server-side predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A `field <op> value` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self { field: field.into(), op, value }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value.into())
    }

    /// Whether this predicate tests tenant equality.
    #[must_use]
    pub fn is_tenant_predicate(&self) -> bool {
        self.field == "tenantId"
    }

    /// Evaluate against a record. Records missing the field never match.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        let Some(actual) = record.value_of(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => actual == self.value,
            FilterOp::Ne => actual != self.value,
            op => match compare_values(&actual, &self.value) {
                Some(ordering) => match op {
                    FilterOp::Lt => ordering == Ordering::Less,
                    FilterOp::Le => ordering != Ordering::Greater,
                    FilterOp::Gt => ordering == Ordering::Greater,
                    FilterOp::Ge => ordering != Ordering::Less,
                    FilterOp::Eq | FilterOp::Ne => false,
                },
                None => false,
            },
        }
    }
}

/// Order of numbers and strings; other combinations are incomparable.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

/// A collection-scoped query as understood by the remote store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteQuery {
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, OrderDirection)>,
    pub limit: Option<usize>,
}

impl RemoteQuery {
    /// A query with no predicates, ordering or limit.
    #[must_use]
    pub fn unscoped() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn ordered_by(mut self, field: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    #[must_use]
    pub fn limited(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn is_unscoped(&self) -> bool {
        self.filters.is_empty()
    }

    /// Evaluate the query in memory: filter, then order, then limit.
    ///
    /// Records missing the ordering field sort last in either direction.
    #[must_use]
    pub fn apply(&self, records: impl IntoIterator<Item = Record>) -> Vec<Record> {
        let mut matched: Vec<Record> = records
            .into_iter()
            .filter(|r| self.filters.iter().all(|f| f.matches(r)))
            .collect();

        if let Some((field, direction)) = &self.order_by {
            matched.sort_by(|a, b| {
                match (a.value_of(field), b.value_of(field)) {
                    (Some(x), Some(y)) => {
                        let ord = compare_values(&x, &y).unwrap_or(Ordering::Equal);
                        match direction {
                            OrderDirection::Asc => ord,
                            OrderDirection::Desc => ord.reverse(),
                        }
                    }
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            });
        }

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

/// The remote, multi-tenant document store of record.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Run a collection-scoped query.
    ///
    /// Rule-scope violations must surface as [`StorageError::PermissionDenied`].
    async fn query(&self, collection: &str, query: &RemoteQuery) -> Result<Vec<Record>, StorageError>;

    /// Whether the client is connected and usable.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Synchronous, string-keyed local storage holding serialized text.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(id: &str, amount: i64) -> Record {
        Record::new(id).with_field("monto", json!(amount))
    }

    #[test]
    fn test_filter_ops() {
        let r = rec("a", 10);
        assert!(Filter::eq("monto", 10).matches(&r));
        assert!(Filter::new("monto", FilterOp::Ne, json!(11)).matches(&r));
        assert!(Filter::new("monto", FilterOp::Lt, json!(11)).matches(&r));
        assert!(Filter::new("monto", FilterOp::Le, json!(10)).matches(&r));
        assert!(Filter::new("monto", FilterOp::Gt, json!(9.5)).matches(&r));
        assert!(Filter::new("monto", FilterOp::Ge, json!(10)).matches(&r));
        assert!(!Filter::new("monto", FilterOp::Gt, json!("10")).matches(&r));
    }

    #[test]
    fn test_missing_field_never_matches() {
        let r = rec("a", 10);
        assert!(!Filter::eq("cliente", "ACME").matches(&r));
        assert!(!Filter::new("cliente", FilterOp::Ne, json!("ACME")).matches(&r));
    }

    #[test]
    fn test_typed_fields_are_filterable() {
        let r = rec("a", 1).with_tenant("t1");
        assert!(Filter::eq("tenantId", "t1").matches(&r));
        assert!(Filter::eq("deleted", false).matches(&r));
        assert!(!Filter::eq("deleted", true).matches(&r));
    }

    #[test]
    fn test_apply_orders_and_limits() {
        let records = vec![rec("a", 5), rec("b", 20), Record::new("c"), rec("d", 12)];

        let query = RemoteQuery::unscoped()
            .ordered_by("monto", OrderDirection::Desc)
            .limited(3);
        let ids: Vec<String> = query
            .apply(records.clone())
            .iter()
            .map(|r| r.id_component("id").unwrap())
            .collect();
        assert_eq!(ids, vec!["b", "d", "a"]);

        let asc = RemoteQuery::unscoped().ordered_by("monto", OrderDirection::Asc);
        let ids: Vec<String> = asc
            .apply(records)
            .iter()
            .map(|r| r.id_component("id").unwrap())
            .collect();
        assert_eq!(ids, vec!["a", "d", "b", "c"]);
    }

    #[test]
    fn test_error_classification() {
        assert!(StorageError::PermissionDenied("rules".into()).is_permission_denied());
        assert!(!StorageError::Unavailable("net".into()).is_permission_denied());
        assert_eq!(StorageError::NotReady("x".into()).kind(), "not_ready");
        assert_eq!(
            StorageError::MalformedEntry { key: "erp_cxc".into(), reason: "eof".into() }.to_string(),
            "Malformed local entry at 'erp_cxc': eof"
        );
    }
}

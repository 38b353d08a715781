use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::record::Record;
use super::traits::{RemoteQuery, RemoteStore, StorageError};

/// Which queries the in-memory store rejects with a permission error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessRule {
    /// Every query is allowed
    #[default]
    Open,
    /// Queries carrying any predicate are denied; unscoped reads pass
    DenyFiltered,
    /// Every query is denied
    DenyAll,
}

/// In-memory remote document store.
///
/// Evaluates [`RemoteQuery`] the same way the hosted store does and counts
/// every call that reaches it, which makes it the reference backend for
/// tests and for offline runs.
pub struct InMemoryRemote {
    collections: DashMap<String, Vec<Record>>,
    access: RwLock<AccessRule>,
    outage: RwLock<Option<StorageError>>,
    ready: AtomicBool,
    fetches: AtomicU64,
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
            access: RwLock::new(AccessRule::Open),
            outage: RwLock::new(None),
            ready: AtomicBool::new(true),
            fetches: AtomicU64::new(0),
        }
    }

    /// Insert or replace (by `id` field) a record.
    pub fn insert(&self, collection: &str, record: Record) {
        let mut docs = self.collections.entry(collection.to_string()).or_default();
        let existing = record.id_component("id").and_then(|id| {
            docs.iter()
                .position(|d| d.id_component("id").as_deref() == Some(id.as_str()))
        });
        match existing {
            Some(pos) => docs[pos] = record,
            None => docs.push(record),
        }
    }

    /// Remove a record by its `id` field. Returns whether it existed.
    pub fn remove(&self, collection: &str, id: &str) -> bool {
        match self.collections.get_mut(collection) {
            Some(mut docs) => {
                let before = docs.len();
                docs.retain(|d| d.id_component("id").as_deref() != Some(id));
                docs.len() != before
            }
            None => false,
        }
    }

    /// Number of records stored in a collection (deleted ones included).
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map(|d| d.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collections.iter().all(|c| c.value().is_empty())
    }

    pub fn set_access(&self, rule: AccessRule) {
        *self.access.write() = rule;
    }

    /// Fail every query with `error` until cleared with `None`.
    pub fn set_outage(&self, error: Option<StorageError>) {
        *self.outage.write() = error;
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Number of queries that reached the store.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn reset_fetch_count(&self) {
        self.fetches.store(0, Ordering::SeqCst);
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn query(&self, collection: &str, query: &RemoteQuery) -> Result<Vec<Record>, StorageError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.outage.read().clone() {
            return Err(err);
        }

        let denied = match *self.access.read() {
            AccessRule::Open => false,
            AccessRule::DenyFiltered => !query.is_unscoped(),
            AccessRule::DenyAll => true,
        };
        if denied {
            return Err(StorageError::PermissionDenied(format!(
                "query on '{}' rejected by access rules",
                collection
            )));
        }

        let docs = self
            .collections
            .get(collection)
            .map(|d| d.value().clone())
            .unwrap_or_default();
        Ok(query.apply(docs))
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::{Filter, OrderDirection};
    use serde_json::json;

    fn ids(records: &[Record]) -> Vec<String> {
        records.iter().filter_map(|r| r.id_component("id")).collect()
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryRemote::new();
        assert!(store.is_empty());
        assert_eq!(store.len("logistica"), 0);
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_insert_and_query() {
        let store = InMemoryRemote::new();
        store.insert("logistica", Record::new("1").with_tenant("t1"));
        store.insert("logistica", Record::new("2").with_tenant("t2"));

        let all = store.query("logistica", &RemoteQuery::unscoped()).await.unwrap();
        assert_eq!(all.len(), 2);

        let scoped = store
            .query("logistica", &RemoteQuery::unscoped().with_filter(Filter::eq("tenantId", "t2")))
            .await
            .unwrap();
        assert_eq!(ids(&scoped), vec!["2"]);
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_insert_replaces_same_id() {
        let store = InMemoryRemote::new();
        store.insert("cxc", Record::new("1").with_field("monto", json!(1)));
        store.insert("cxc", Record::new("1").with_field("monto", json!(2)));

        assert_eq!(store.len("cxc"), 1);
        let docs = store.query("cxc", &RemoteQuery::unscoped()).await.unwrap();
        assert_eq!(docs[0].fields["monto"], 2);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = InMemoryRemote::new();
        store.insert("cxc", Record::new("1"));

        assert!(store.remove("cxc", "1"));
        assert!(!store.remove("cxc", "1"));
        assert!(!store.remove("missing", "1"));
        assert_eq!(store.len("cxc"), 0);
    }

    #[tokio::test]
    async fn test_order_and_limit() {
        let store = InMemoryRemote::new();
        for (id, n) in [("a", 1), ("b", 3), ("c", 2)] {
            store.insert("diesel", Record::new(id).with_field("litros", json!(n)));
        }

        let query = RemoteQuery::unscoped()
            .ordered_by("litros", OrderDirection::Desc)
            .limited(2);
        let docs = store.query("diesel", &query).await.unwrap();
        assert_eq!(ids(&docs), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_deny_filtered_allows_unscoped() {
        let store = InMemoryRemote::new();
        store.insert("cxp", Record::new("1"));
        store.set_access(AccessRule::DenyFiltered);

        let scoped = RemoteQuery::unscoped().with_filter(Filter::eq("deleted", false));
        let err = store.query("cxp", &scoped).await.unwrap_err();
        assert!(err.is_permission_denied());

        let open = store.query("cxp", &RemoteQuery::unscoped()).await.unwrap();
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn test_deny_all_and_outage() {
        let store = InMemoryRemote::new();
        store.set_access(AccessRule::DenyAll);
        assert!(store.query("cxp", &RemoteQuery::unscoped()).await.unwrap_err().is_permission_denied());

        store.set_access(AccessRule::Open);
        store.set_outage(Some(StorageError::Unavailable("offline".into())));
        let err = store.query("cxp", &RemoteQuery::unscoped()).await.unwrap_err();
        assert_eq!(err, StorageError::Unavailable("offline".into()));

        store.set_outage(None);
        assert!(store.query("cxp", &RemoteQuery::unscoped()).await.is_ok());
        assert_eq!(store.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_inserts() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryRemote::new());
        let mut handles = vec![];

        for batch in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    store.insert("logistica", Record::new(format!("{}-{}", batch, i)));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len("logistica"), 100);
    }
}

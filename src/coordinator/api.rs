//! Public API exposed to business-logic and UI callers.
//!
//! Thin delegation to the owned components; every operation here is safe to
//! call in any [`ServiceState`](super::ServiceState).

use std::sync::Arc;

use crate::cache::{CacheStats, QueryCache, QueryOptions};
use crate::gc::GcReport;
use crate::mirror::LocalMirror;
use crate::record::{Record, SchemaRegistry};
use crate::storage::traits::StorageError;
use crate::tenant::TenantContext;
use crate::verify::{ModuleReport, ReconcileReport, RecordReport, VerificationSummary};

use super::{ServiceStatus, TenantSync};

impl TenantSync {
    /// Read `collection` through the tenant-scoped query cache.
    ///
    /// Never fails. An empty result means "unknown" when the remote store was
    /// unreachable or no identity is signed in.
    pub async fn get_cached(&self, collection: &str, options: &QueryOptions) -> Vec<Record> {
        self.cache.get_cached(collection, options).await
    }

    /// Drop every cached result of `collection`. Call after a write to it.
    pub fn invalidate(&self, collection: &str) -> usize {
        self.cache.invalidate(collection)
    }

    /// Drop every cached result.
    pub fn clear_all(&self) -> usize {
        self.cache.clear_all()
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Purge stale, deleted and out-of-tenant records from the local mirror now.
    pub fn run_garbage_collection(&self) -> Result<GcReport, StorageError> {
        self.gc.run()
    }

    pub async fn verify_module(&self, module: &str) -> Result<ModuleReport, StorageError> {
        self.verifier.verify_module(module).await
    }

    pub async fn verify_all(&self) -> VerificationSummary {
        self.verifier.verify_all().await
    }

    pub async fn verify_record(&self, module: &str, record_id: &str) -> Result<RecordReport, StorageError> {
        self.verifier.verify_record(module, record_id).await
    }

    /// Verify a module and delete local records the remote store no longer has.
    pub async fn reconcile_module(&self, module: &str) -> Result<ReconcileReport, StorageError> {
        self.verifier.reconcile_module(module).await
    }

    pub async fn reconcile_all(&self) -> Vec<ReconcileReport> {
        self.verifier.reconcile_all().await
    }

    #[must_use]
    pub fn mirror(&self) -> &LocalMirror {
        &self.mirror
    }

    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Cached diagnostics, no I/O.
    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        let tenant_id = TenantContext::current(self.identity.as_ref(), &self.config).map(|c| c.tenant_id);
        ServiceStatus {
            state: self.state(),
            remote_ready: self.remote.is_ready(),
            has_identity: tenant_id.is_some(),
            tenant_id,
            cache_entries: self.cache.len(),
            background_tasks: self.tasks.lock().iter().filter(|t| !t.is_finished()).count(),
        }
    }
}

//! Reconciliation between the local mirror and the remote store.
//!
//! Per module, the full local set is compared with the full tenant-scoped
//! remote set by business id:
//!
//! ```text
//!   local ids ─┐                 ┌─► missing_in_remote = L ∖ R  → delete locally
//!              ├─ symmetric diff ┤
//!  remote ids ─┘                 └─► missing_in_local  = R ∖ L  → report only
//! ```
//!
//! The remote store is authoritative. Records missing locally are never
//! copied in, and nothing is deleted when the remote read fails.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::TenantSyncConfig;
use crate::metrics;
use crate::mirror::LocalMirror;
use crate::record::{ModuleSchema, Record, SchemaRegistry};
use crate::storage::traits::{RemoteQuery, StorageError};
use crate::tenant::{IdentityProvider, TenantContext, TenantFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyKind {
    /// Present locally, absent remotely
    MissingInRemote,
    /// Present remotely, absent locally
    MissingInLocal,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Inconsistency {
    #[serde(rename = "type")]
    pub kind: InconsistencyKind,
    pub entity_id: String,
    pub module: String,
}

/// `(local ∖ remote) ∪ (remote ∖ local)`, each half sorted by id.
#[must_use]
pub fn symmetric_difference(
    module: &str,
    local_ids: &BTreeSet<String>,
    remote_ids: &BTreeSet<String>,
) -> Vec<Inconsistency> {
    let tag = |kind, id: &String| Inconsistency {
        kind,
        entity_id: id.clone(),
        module: module.to_string(),
    };
    local_ids
        .difference(remote_ids)
        .map(|id| tag(InconsistencyKind::MissingInRemote, id))
        .chain(
            remote_ids
                .difference(local_ids)
                .map(|id| tag(InconsistencyKind::MissingInLocal, id)),
        )
        .collect()
}

/// Verification result of one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleReport {
    pub module: String,
    pub local_count: usize,
    pub remote_count: usize,
    pub inconsistencies: Vec<Inconsistency>,
    pub is_synced: bool,
    /// Set when the module could not be verified
    pub error: Option<String>,
}

impl ModuleReport {
    fn failed(module: &str, error: &StorageError) -> Self {
        Self {
            module: module.to_string(),
            local_count: 0,
            remote_count: 0,
            inconsistencies: Vec::new(),
            is_synced: false,
            error: Some(error.to_string()),
        }
    }

    /// Ids of the given kind, sorted.
    #[must_use]
    pub fn ids_of(&self, kind: InconsistencyKind) -> Vec<String> {
        self.inconsistencies
            .iter()
            .filter(|i| i.kind == kind)
            .map(|i| i.entity_id.clone())
            .collect()
    }
}

/// Aggregate of [`Verifier::verify_all`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationSummary {
    pub modules: Vec<ModuleReport>,
    pub synced_modules: usize,
    pub inconsistent_modules: usize,
    pub total_local: usize,
    pub total_remote: usize,
}

impl VerificationSummary {
    fn from_reports(modules: Vec<ModuleReport>) -> Self {
        let synced_modules = modules.iter().filter(|m| m.is_synced).count();
        Self {
            synced_modules,
            inconsistent_modules: modules.len() - synced_modules,
            total_local: modules.iter().map(|m| m.local_count).sum(),
            total_remote: modules.iter().map(|m| m.remote_count).sum(),
            modules,
        }
    }
}

/// Outcome of [`Verifier::reconcile_module`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub module: String,
    /// Ids deleted from the local mirror
    pub removed_local: Vec<String>,
    /// Ids reported but deliberately not copied locally
    pub missing_in_local: Vec<String>,
    /// Verification performed before deleting
    pub report: ModuleReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Synced,
    RemoteOnly,
    LocalOnly,
    AbsentBoth,
}

impl RecordStatus {
    fn classify(in_local: bool, in_remote: bool) -> Self {
        match (in_local, in_remote) {
            (true, true) => Self::Synced,
            (false, true) => Self::RemoteOnly,
            (true, false) => Self::LocalOnly,
            (false, false) => Self::AbsentBoth,
        }
    }
}

/// Presence of one record in both stores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordReport {
    pub record_id: String,
    pub module: String,
    pub in_local: bool,
    pub in_remote: bool,
    /// Present in both or in neither
    pub is_synced: bool,
    pub status: RecordStatus,
    pub local: Option<Record>,
    pub remote: Option<Record>,
}

/// Local and remote sets of one module.
struct ModuleSets {
    local: Vec<Record>,
    local_ids: BTreeSet<String>,
    remote: Vec<Record>,
    remote_ids: BTreeSet<String>,
}

pub struct Verifier {
    filter: Arc<TenantFilter>,
    mirror: Arc<LocalMirror>,
    registry: Arc<SchemaRegistry>,
    identity: Arc<dyn IdentityProvider>,
    config: TenantSyncConfig,
}

impl Verifier {
    pub fn new(
        filter: Arc<TenantFilter>,
        mirror: Arc<LocalMirror>,
        registry: Arc<SchemaRegistry>,
        identity: Arc<dyn IdentityProvider>,
        config: TenantSyncConfig,
    ) -> Self {
        Self { filter, mirror, registry, identity, config }
    }

    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    fn schema(&self, module: &str) -> Result<&ModuleSchema, StorageError> {
        self.registry
            .get(module)
            .ok_or_else(|| StorageError::UnknownModule(module.to_string()))
    }

    async fn load_sets(&self, schema: &ModuleSchema) -> Result<ModuleSets, StorageError> {
        let ctx = TenantContext::current(self.identity.as_ref(), &self.config)
            .ok_or_else(|| StorageError::NotReady("no tenant context".to_string()))?;

        let snapshot = self.mirror.load_module(schema)?;
        let local_ids = snapshot.ids(schema);
        let local: Vec<Record> = snapshot.entries.into_iter().map(|e| e.record).collect();

        let (_, remote) = self
            .filter
            .fetch(&ctx, &schema.collection, &RemoteQuery::unscoped())
            .await?;
        let remote_ids = remote.iter().filter_map(|r| schema.identify(r)).collect();

        Ok(ModuleSets { local, local_ids, remote, remote_ids })
    }

    /// Compare one module. Fails when either side cannot be read.
    #[tracing::instrument(skip(self))]
    pub async fn verify_module(&self, module: &str) -> Result<ModuleReport, StorageError> {
        let schema = self.schema(module)?;
        let sets = self.load_sets(schema).await?;

        let inconsistencies = symmetric_difference(module, &sets.local_ids, &sets.remote_ids);
        metrics::set_module_inconsistencies(module, inconsistencies.len());

        let report = ModuleReport {
            module: module.to_string(),
            local_count: sets.local.len(),
            remote_count: sets.remote.len(),
            is_synced: inconsistencies.is_empty(),
            inconsistencies,
            error: None,
        };
        info!(
            module,
            local = report.local_count,
            remote = report.remote_count,
            inconsistencies = report.inconsistencies.len(),
            "Module verified"
        );
        Ok(report)
    }

    /// Verify, then delete every `missing_in_remote` id from the local mirror.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_module(&self, module: &str) -> Result<ReconcileReport, StorageError> {
        let schema = self.schema(module)?;
        let report = self.verify_module(module).await?;

        let removed_local = report.ids_of(InconsistencyKind::MissingInRemote);
        let to_remove: BTreeSet<String> = removed_local.iter().cloned().collect();
        let removed_entries = self.mirror.remove_ids(schema, &to_remove)?;
        metrics::record_reconcile_removed(module, removed_entries);

        if removed_entries > 0 {
            info!(module, ids = removed_local.len(), entries = removed_entries, "Orphaned mirror records removed");
        }

        Ok(ReconcileReport {
            module: module.to_string(),
            missing_in_local: report.ids_of(InconsistencyKind::MissingInLocal),
            removed_local,
            report,
        })
    }

    /// Verify every registered module, continuing past failures.
    pub async fn verify_all(&self) -> VerificationSummary {
        let mut reports = Vec::new();
        for module in self.registry.module_names() {
            match self.verify_module(&module).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(module = %module, error = %e, "Module verification failed");
                    reports.push(ModuleReport::failed(&module, &e));
                }
            }
        }

        let summary = VerificationSummary::from_reports(reports);
        info!(
            synced = summary.synced_modules,
            inconsistent = summary.inconsistent_modules,
            total_local = summary.total_local,
            total_remote = summary.total_remote,
            "Verification complete"
        );
        summary
    }

    /// Reconcile every registered module, continuing past failures.
    pub async fn reconcile_all(&self) -> Vec<ReconcileReport> {
        let mut results = Vec::new();
        for module in self.registry.module_names() {
            match self.reconcile_module(&module).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(module = %module, error = %e, "Module reconciliation failed");
                    results.push(ReconcileReport {
                        module: module.clone(),
                        removed_local: Vec::new(),
                        missing_in_local: Vec::new(),
                        report: ModuleReport::failed(&module, &e),
                    });
                }
            }
        }
        results
    }

    /// Locate one business id in both stores.
    #[tracing::instrument(skip(self))]
    pub async fn verify_record(&self, module: &str, record_id: &str) -> Result<RecordReport, StorageError> {
        let schema = self.schema(module)?;
        let sets = self.load_sets(schema).await?;

        let find = |records: Vec<Record>| {
            records
                .into_iter()
                .find(|r| schema.identify(r).as_deref() == Some(record_id))
        };
        let local = find(sets.local);
        let remote = find(sets.remote);

        let (in_local, in_remote) = (local.is_some(), remote.is_some());
        Ok(RecordReport {
            record_id: record_id.to_string(),
            module: module.to_string(),
            in_local,
            in_remote,
            is_synced: in_local == in_remote,
            status: RecordStatus::classify(in_local, in_remote),
            local,
            remote,
        })
    }
}

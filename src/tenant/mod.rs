// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tenant scoping of remote reads.
//!
//! The remote store's authorization rules cannot evaluate a per-record
//! tenant-equality predicate for every query shape, so scoping is applied
//! after the fetch, in memory:
//!
//! ```text
//!        ┌──────────┐  permission denied AND     ┌───────────┐
//!  ────► │  Scoped  │ ─ canonical demo identity ─►│ Fallback  │
//!        └──────────┘                             └───────────┘
//!             │ any other error                        │ any error
//!             ▼                                        ▼
//!        empty result (degraded)                 empty result (degraded)
//! ```
//!
//! - **Scoped**: remote query = caller filters minus tenant equality, plus
//!   `deleted == false`; every candidate then passes [`TenantContext::can_see`].
//! - **Fallback**: remote query carries no predicates at all; caller filters,
//!   ordering and limit are re-applied in memory, restricted to untagged or
//!   canonical-demo-tenant records.
//!
//! There is no transition back to Scoped within one call.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::TenantSyncConfig;
use crate::metrics::{self, LatencyTimer};
use crate::record::Record;
use crate::storage::traits::{Filter, RemoteQuery, RemoteStore, StorageError};

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    pub tenant_id: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), email: None, tenant_id: None }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

/// Source of the current caller. May become unset at any time.
pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<Identity>;
}

/// Process-wide session holder, signed in and out by the host.
#[derive(Debug, Default)]
pub struct SessionIdentity {
    current: RwLock<Option<Identity>>,
}

impl SessionIdentity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(identity: Identity) -> Self {
        Self { current: RwLock::new(Some(identity)) }
    }

    pub fn sign_in(&self, identity: Identity) {
        *self.current.write() = Some(identity);
    }

    pub fn sign_out(&self) {
        *self.current.write() = None;
    }
}

impl IdentityProvider for SessionIdentity {
    fn current(&self) -> Option<Identity> {
        self.current.read().clone()
    }
}

/// Tenant scope of one call. Derived per call, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: String,
    /// Caller is the canonical demo account (may enter Fallback)
    pub is_canonical_demo_identity: bool,
    /// Caller's tenant is the canonical demo tenant (sees untagged records)
    pub is_canonical_demo_tenant: bool,
}

impl TenantContext {
    /// The identity's tenant, or its user id when it carries none.
    pub fn derive(identity: &Identity, config: &TenantSyncConfig) -> Self {
        let tenant_id = identity
            .tenant_id
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&identity.user_id)
            .to_string();
        let is_canonical_demo_identity = identity
            .email
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case(&config.canonical_demo_identity));

        Self {
            is_canonical_demo_tenant: tenant_id == config.canonical_demo_tenant,
            tenant_id,
            is_canonical_demo_identity,
        }
    }

    /// Context of the provider's current caller, if any.
    pub fn current(provider: &dyn IdentityProvider, config: &TenantSyncConfig) -> Option<Self> {
        provider.current().map(|identity| Self::derive(&identity, config))
    }

    /// Whether a record may be returned to this caller as live data.
    #[must_use]
    pub fn can_see(&self, record: &Record) -> bool {
        if record.deleted {
            return false;
        }
        match record.tenant() {
            Some(tenant) => tenant == self.tenant_id,
            None => self.is_canonical_demo_tenant,
        }
    }

    /// Visibility in the Fallback phase: untagged or demo-tenant records only.
    #[must_use]
    pub fn fallback_visible(&self, record: &Record) -> bool {
        self.can_see(record) && (record.tenant().is_none() || self.is_canonical_demo_tenant)
    }
}

/// Phase of the tenant-filter state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPhase {
    Scoped,
    Fallback,
}

impl FetchPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scoped => "scoped",
            Self::Fallback => "fallback",
        }
    }

    /// Next phase after a failed fetch, or `None` when the call is over.
    #[must_use]
    pub fn on_error(self, error: &StorageError, ctx: &TenantContext) -> Option<Self> {
        match self {
            Self::Scoped if error.is_permission_denied() && ctx.is_canonical_demo_identity => {
                Some(Self::Fallback)
            }
            _ => None,
        }
    }
}

impl fmt::Display for FetchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a read that never fails.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    /// Phase the call ended in
    pub phase: FetchPhase,
    pub records: Vec<Record>,
    /// The empty result stands for "unknown", not "confirmed zero"
    pub degraded: bool,
}

/// Tenant-scoped reads against the remote store.
pub struct TenantFilter {
    remote: Arc<dyn RemoteStore>,
}

impl TenantFilter {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }

    /// Fetch and scope a result set. Errors of the final phase propagate.
    pub async fn fetch(
        &self,
        ctx: &TenantContext,
        collection: &str,
        query: &RemoteQuery,
    ) -> Result<(FetchPhase, Vec<Record>), StorageError> {
        let (phase, result) = self.run(ctx, collection, query).await;
        result.map(|records| (phase, records))
    }

    /// Fetch and scope a result set, degrading every failure to an empty result.
    pub async fn fetch_or_empty(
        &self,
        ctx: &TenantContext,
        collection: &str,
        query: &RemoteQuery,
    ) -> FilterOutcome {
        match self.run(ctx, collection, query).await {
            (phase, Ok(records)) => FilterOutcome { phase, records, degraded: false },
            (phase, Err(e)) => {
                warn!(
                    collection,
                    tenant = %ctx.tenant_id,
                    phase = %phase,
                    error = %e,
                    "Remote read failed, returning empty result"
                );
                FilterOutcome { phase, records: Vec::new(), degraded: true }
            }
        }
    }

    async fn run(
        &self,
        ctx: &TenantContext,
        collection: &str,
        query: &RemoteQuery,
    ) -> (FetchPhase, Result<Vec<Record>, StorageError>) {
        let mut phase = FetchPhase::Scoped;

        if !self.remote.is_ready() {
            metrics::record_remote_fetch(collection, phase.as_str(), "not_ready");
            return (phase, Err(StorageError::NotReady("remote store client".to_string())));
        }

        let caller_query = without_tenant_predicates(query);

        loop {
            let remote_query = match phase {
                FetchPhase::Scoped => caller_query
                    .clone()
                    .with_filter(Filter::eq("deleted", false)),
                FetchPhase::Fallback => RemoteQuery::unscoped(),
            };

            let fetched = {
                let _timer = LatencyTimer::new(collection);
                self.remote.query(collection, &remote_query).await
            };

            match fetched {
                Ok(candidates) => {
                    metrics::record_remote_fetch(collection, phase.as_str(), "success");
                    let fetched_count = candidates.len();
                    let visible: Vec<Record> = match phase {
                        FetchPhase::Scoped => {
                            candidates.into_iter().filter(|r| ctx.can_see(r)).collect()
                        }
                        FetchPhase::Fallback => caller_query.apply(
                            candidates.into_iter().filter(|r| ctx.fallback_visible(r)),
                        ),
                    };
                    metrics::record_tenant_filtered(
                        collection,
                        fetched_count.saturating_sub(visible.len()),
                    );
                    debug!(
                        collection,
                        phase = %phase,
                        fetched = fetched_count,
                        visible = visible.len(),
                        "Remote read scoped to tenant"
                    );
                    return (phase, Ok(visible));
                }
                Err(e) => {
                    metrics::record_remote_fetch(collection, phase.as_str(), e.kind());
                    match phase.on_error(&e, ctx) {
                        Some(next) => {
                            warn!(
                                collection,
                                error = %e,
                                "Scoped read denied for demo identity, retrying unscoped"
                            );
                            phase = next;
                        }
                        None => return (phase, Err(e)),
                    }
                }
            }
        }
    }
}

/// Tenant scoping is never delegated to the remote store.
fn without_tenant_predicates(query: &RemoteQuery) -> RemoteQuery {
    RemoteQuery {
        filters: query
            .filters
            .iter()
            .filter(|f| !f.is_tenant_predicate())
            .cloned()
            .collect(),
        order_by: query.order_by.clone(),
        limit: query.limit,
    }
}

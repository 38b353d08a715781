// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local mirror garbage collection.
//!
//! One pass per identity session, purely local. Every location returned by
//! [`SchemaRegistry::gc_locations`] is loaded (module locations plus legacy
//! stores no module verifies) and any record matching a purge rule is
//! deleted in place.
//!
//! # Purge rules
//!
//! | Condition | Purged |
//! |-----------|--------|
//! | `tenantId` present and not the current tenant | yes |
//! | `deleted == true` | yes |
//! | no `tenantId`, no `userId`, current tenant is not the demo tenant | yes |
//! | anything else | no |
//!
//! The pass only removes entries and never rewrites retained ones, so
//! running it again without intervening writes removes nothing.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::TenantSyncConfig;
use crate::metrics;
use crate::mirror::LocalMirror;
use crate::record::{Record, SchemaRegistry};
use crate::storage::traits::StorageError;
use crate::tenant::{IdentityProvider, TenantContext};

/// Outcome of one garbage collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub tenant_id: String,
    /// Records deleted
    pub removed: usize,
    /// Malformed entries and unreadable locations left untouched
    pub skipped_malformed: usize,
    /// Locations written back
    pub locations_rewritten: usize,
}

/// Whether a mirrored record is stale for the caller.
#[must_use]
pub fn should_purge(ctx: &TenantContext, record: &Record) -> bool {
    if record.deleted {
        return true;
    }
    match (record.tenant(), record.owner()) {
        (Some(tenant), _) => tenant != ctx.tenant_id,
        (None, None) => !ctx.is_canonical_demo_tenant,
        (None, Some(_)) => false,
    }
}

pub struct GarbageCollector {
    mirror: Arc<LocalMirror>,
    identity: Arc<dyn IdentityProvider>,
    registry: Arc<SchemaRegistry>,
    config: TenantSyncConfig,
    /// User id of the session already swept
    last_session: Mutex<Option<String>>,
}

impl GarbageCollector {
    pub fn new(
        mirror: Arc<LocalMirror>,
        identity: Arc<dyn IdentityProvider>,
        registry: Arc<SchemaRegistry>,
        config: TenantSyncConfig,
    ) -> Self {
        Self {
            mirror,
            identity,
            registry,
            config,
            last_session: Mutex::new(None),
        }
    }

    /// Sweep every tracked location now.
    pub fn run(&self) -> Result<GcReport, StorageError> {
        let ctx = TenantContext::current(self.identity.as_ref(), &self.config)
            .ok_or_else(|| StorageError::NotReady("no tenant context".to_string()))?;

        let result = self.sweep(&ctx);
        metrics::record_gc_run(result.is_ok());
        result
    }

    /// Sweep once per identity session. `Ok(None)` when this session was
    /// already swept.
    pub fn run_for_session(&self) -> Result<Option<GcReport>, StorageError> {
        let identity = self
            .identity
            .current()
            .ok_or_else(|| StorageError::NotReady("no caller identity".to_string()))?;

        let mut last = self.last_session.lock();
        if last.as_deref() == Some(identity.user_id.as_str()) {
            debug!(user = %identity.user_id, "Session already swept");
            return Ok(None);
        }

        let ctx = TenantContext::derive(&identity, &self.config);
        let result = self.sweep(&ctx);
        metrics::record_gc_run(result.is_ok());
        let report = result?;
        *last = Some(identity.user_id);
        Ok(Some(report))
    }

    fn sweep(&self, ctx: &TenantContext) -> Result<GcReport, StorageError> {
        let mut report = GcReport {
            tenant_id: ctx.tenant_id.clone(),
            ..GcReport::default()
        };

        for location in self.registry.gc_locations() {
            match self.mirror.retain(&location, |record| !should_purge(ctx, record)) {
                Ok(outcome) => {
                    report.removed += outcome.removed;
                    report.skipped_malformed += outcome.malformed;
                    if outcome.removed > 0 {
                        report.locations_rewritten += 1;
                        debug!(location = %location, removed = outcome.removed, "Stale mirror records purged");
                    }
                }
                Err(e @ StorageError::MalformedEntry { .. }) => {
                    warn!(location = %location, error = %e, "Skipping unreadable mirror location");
                    report.skipped_malformed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        metrics::record_gc_removed(report.removed);
        metrics::record_malformed_entries(report.skipped_malformed);
        info!(
            tenant = %report.tenant_id,
            removed = report.removed,
            skipped = report.skipped_malformed,
            rewritten = report.locations_rewritten,
            "Garbage collection complete"
        );
        Ok(report)
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tenant sync coordinator.
//!
//! [`TenantSync`] is the service object handed to UI and business-logic
//! callers. It owns one instance of each component and wires them to the
//! same remote store, identity provider and local storage:
//! - [`QueryCache`] over a shared [`TenantFilter`]
//! - [`GarbageCollector`] over the [`LocalMirror`]
//! - [`Verifier`] over both
//!
//! # Lifecycle
//!
//! ```text
//! Created → Running → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tenant_sync::{
//!     Identity, InMemoryKv, InMemoryRemote, QueryOptions, ServiceState, SessionIdentity,
//!     TenantSync, TenantSyncConfig,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let session = Arc::new(SessionIdentity::new());
//! let service = TenantSync::new(
//!     TenantSyncConfig::default(),
//!     Arc::new(InMemoryRemote::new()),
//!     session.clone(),
//!     Arc::new(InMemoryKv::new()),
//! );
//! assert_eq!(service.state(), ServiceState::Created);
//!
//! service.start().await.expect("start failed");
//! session.sign_in(Identity::new("uid").with_tenant("t1"));
//! let invoices = service.get_cached("invoices", &QueryOptions::limited(10)).await;
//! # drop(invoices);
//! service.shutdown().await;
//! # }
//! ```

mod types;
mod api;
mod lifecycle;

pub use types::{ServiceState, ServiceStatus};

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::cache::QueryCache;
use crate::clock::{Clock, MonotonicClock};
use crate::config::TenantSyncConfig;
use crate::gc::GarbageCollector;
use crate::mirror::LocalMirror;
use crate::record::SchemaRegistry;
use crate::scheduler::BackgroundTask;
use crate::storage::traits::{KeyValueStorage, RemoteStore};
use crate::tenant::{IdentityProvider, TenantFilter};
use crate::verify::Verifier;

/// Caching, tenant-isolation and reconciliation service.
///
/// # Thread Safety
///
/// `Send + Sync`; share it behind an `Arc`. The cache map is a `DashMap` and
/// every local mirror rewrite is serialized by the mirror's own lock.
pub struct TenantSync {
    pub(super) config: TenantSyncConfig,

    /// Service state (broadcast to watchers)
    pub(super) state: watch::Sender<ServiceState>,
    pub(super) state_rx: watch::Receiver<ServiceState>,

    pub(super) remote: Arc<dyn RemoteStore>,
    pub(super) identity: Arc<dyn IdentityProvider>,
    pub(super) registry: Arc<SchemaRegistry>,
    pub(super) mirror: Arc<LocalMirror>,
    pub(super) cache: Arc<QueryCache>,
    pub(super) gc: Arc<GarbageCollector>,
    pub(super) verifier: Arc<Verifier>,

    /// Scheduled background passes
    pub(super) tasks: Mutex<Vec<BackgroundTask>>,
}

impl TenantSync {
    /// Create a service with the standard module registry and a monotonic clock.
    pub fn new(
        config: TenantSyncConfig,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
        storage: Arc<dyn KeyValueStorage>,
    ) -> Self {
        let registry = SchemaRegistry::standard(&config.mirror_key_prefix);
        Self::with_parts(config, remote, identity, storage, registry, Arc::new(MonotonicClock::new()))
    }

    /// Create a service with an explicit module registry and clock.
    pub fn with_parts(
        config: TenantSyncConfig,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
        storage: Arc<dyn KeyValueStorage>,
        registry: SchemaRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ServiceState::Created);
        let registry = Arc::new(registry);
        let filter = Arc::new(TenantFilter::new(remote.clone()));
        let mirror = Arc::new(LocalMirror::new(storage, config.mirror_max_entries_per_location));

        let cache = Arc::new(QueryCache::new(
            filter.clone(),
            identity.clone(),
            clock,
            config.clone(),
        ));
        let gc = Arc::new(GarbageCollector::new(
            mirror.clone(),
            identity.clone(),
            registry.clone(),
            config.clone(),
        ));
        let verifier = Arc::new(Verifier::new(
            filter,
            mirror.clone(),
            registry.clone(),
            identity.clone(),
            config.clone(),
        ));

        crate::metrics::set_service_state("Created");

        Self {
            config,
            state: state_tx,
            state_rx,
            remote,
            identity,
            registry,
            mirror,
            cache,
            gc,
            verifier,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Get current service state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ServiceState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn config(&self) -> &TenantSyncConfig {
        &self.config
    }
}

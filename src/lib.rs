//! # Tenant Sync
//!
//! Caching, tenant-isolation and reconciliation layer between application
//! callers and two data stores: a remote multi-tenant document store of
//! record and a local key-value mirror.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     UI / business logic                     │
//! │  • get_cached(), invalidate(), verify_*()                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Query Cache                          │
//! │  • DashMap keyed by collection + sha256(tenant, shape)     │
//! │  • Fixed TTL, periodic sweep, no-identity short-circuit    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ miss
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Tenant Filter & Fallback                   │
//! │  • Scoped → Fallback state machine                         │
//! │  • In-memory tenant scoping, errors degrade to empty       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                     Remote document store
//!
//! ┌────────────────────────┐        ┌──────────────────────────┐
//! │   Garbage Collector    │        │  Reconciliation/Verifier │
//! │  • once per session    │        │  • local ∆ remote by id  │
//! │  • local only          │        │  • deletes local orphans │
//! └────────────────────────┘        └──────────────────────────┘
//!              │                                  │
//!              └──────────────┬───────────────────┘
//!                             ▼
//!                 Local mirror (key-value storage)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tenant_sync::{
//!     Identity, InMemoryKv, InMemoryRemote, QueryOptions, SessionIdentity, TenantSync,
//!     TenantSyncConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let session = Arc::new(SessionIdentity::new());
//!     let service = TenantSync::new(
//!         TenantSyncConfig::default(),
//!         Arc::new(InMemoryRemote::new()),
//!         session.clone(),
//!         Arc::new(InMemoryKv::new()),
//!     );
//!     service.start().await.expect("Failed to start");
//!
//!     session.sign_in(Identity::new("uid-1").with_tenant("acme"));
//!
//!     // Served from cache for 5 minutes
//!     let rows = service.get_cached("logistica", &QueryOptions::limited(20)).await;
//!     println!("{} rows", rows.len());
//!
//!     // After a write elsewhere
//!     service.invalidate("logistica");
//!
//!     let summary = service.verify_all().await;
//!     println!("{}/{} modules in sync", summary.synced_modules, summary.modules.len());
//!
//!     service.shutdown().await;
//! }
//! ```
//!
//! ## Configuration
//!
//! See [`TenantSyncConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`TenantSync`] service facade
//! - [`cache`]: TTL query cache
//! - [`tenant`]: Identity, tenant context and the scoped/fallback fetch
//! - [`mirror`]: Typed local mirror over key-value storage
//! - [`gc`]: Per-session local mirror garbage collection
//! - [`verify`]: Local/remote reconciliation
//! - [`storage`]: Remote store and key-value storage seams plus in-memory backends
//! - [`scheduler`]: Stoppable background passes

pub mod config;
pub mod clock;
pub mod record;
pub mod storage;
pub mod tenant;
pub mod mirror;
pub mod cache;
pub mod gc;
pub mod verify;
pub mod scheduler;
pub mod coordinator;
pub mod metrics;

pub use config::TenantSyncConfig;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use record::{MirrorLocation, ModuleSchema, Record, SchemaRegistry};
pub use storage::traits::{
    Filter, FilterOp, KeyValueStorage, OrderDirection, RemoteQuery, RemoteStore, StorageError,
};
pub use storage::memory::{AccessRule, InMemoryRemote};
pub use storage::kv::{DirectoryKv, InMemoryKv};
pub use tenant::{
    FetchPhase, FilterOutcome, Identity, IdentityProvider, SessionIdentity, TenantContext,
    TenantFilter,
};
pub use mirror::{LocalMirror, MirrorEntry};
pub use cache::{CacheKey, CacheStats, QueryCache, QueryOptions, QueryShape};
pub use gc::{GarbageCollector, GcReport};
pub use verify::{
    Inconsistency, InconsistencyKind, ModuleReport, ReconcileReport, RecordReport, RecordStatus,
    VerificationSummary, Verifier,
};
pub use scheduler::{BackgroundTask, TaskControl};
pub use coordinator::{ServiceState, ServiceStatus, TenantSync};
pub use metrics::LatencyTimer;

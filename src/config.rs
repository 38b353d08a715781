// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the tenant sync layer.
//!
//! # Example
//!
//! ```
//! use tenant_sync::TenantSyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = TenantSyncConfig::default();
//! assert_eq!(config.cache_ttl_ms, 5 * 60 * 1000); // 5 minutes
//!
//! // Tuned config
//! let config = TenantSyncConfig {
//!     cache_ttl_ms: 60_000,
//!     canonical_demo_tenant: "demo_tenant".into(),
//!     ..Default::default()
//! };
//! assert_eq!(config.cache_ttl().as_secs(), 60);
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the tenant sync layer.
///
/// All fields have defaults matching the behaviour of the browser client
/// this layer serves, so `TenantSyncConfig::default()` is a working setup.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantSyncConfig {
    /// Fixed TTL of every query cache entry (default: 5 minutes)
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Interval of the background TTL sweep (default: 10 minutes)
    #[serde(default = "default_cache_sweep_interval_ms")]
    pub cache_sweep_interval_ms: u64,

    /// Delay before the first garbage collection pass of a session
    #[serde(default = "default_gc_start_delay_ms")]
    pub gc_start_delay_ms: u64,

    /// How often the collector re-checks for a new identity session
    #[serde(default = "default_gc_reauth_delay_ms")]
    pub gc_reauth_delay_ms: u64,

    /// Interval of the periodic reconciliation pass; 0 disables it.
    /// A reconciliation also follows every session garbage collection.
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,

    /// Paged reads
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// Limited reads
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_order_by")]
    pub default_order_by: String,

    /// Tenant granted best-effort visibility into untagged records
    #[serde(default = "default_canonical_demo_tenant")]
    pub canonical_demo_tenant: String,

    /// Identity (login email) allowed to enter the fallback fetch phase
    #[serde(default = "default_canonical_demo_identity")]
    pub canonical_demo_identity: String,

    /// Prefix of local mirror storage keys
    #[serde(default = "default_mirror_key_prefix")]
    pub mirror_key_prefix: String,

    /// Upper bound of records kept per mirror location
    #[serde(default = "default_mirror_max_entries_per_location")]
    pub mirror_max_entries_per_location: usize,
}

fn default_cache_ttl_ms() -> u64 { 5 * 60 * 1000 }
fn default_cache_sweep_interval_ms() -> u64 { 10 * 60 * 1000 }
fn default_gc_start_delay_ms() -> u64 { 10_000 }
fn default_gc_reauth_delay_ms() -> u64 { 5_000 }
fn default_reconcile_interval_ms() -> u64 { 30 * 60 * 1000 }
fn default_page_size() -> usize { 50 }
fn default_max_page_size() -> usize { 100 }
fn default_limit() -> usize { 20 }
fn default_order_by() -> String { "fechaCreacion".to_string() }
fn default_canonical_demo_tenant() -> String { "demo_tenant".to_string() }
fn default_canonical_demo_identity() -> String { "demo@titanfleet.com".to_string() }
fn default_mirror_key_prefix() -> String { "erp_".to_string() }
fn default_mirror_max_entries_per_location() -> usize { 5_000 }

impl Default for TenantSyncConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: default_cache_ttl_ms(),
            cache_sweep_interval_ms: default_cache_sweep_interval_ms(),
            gc_start_delay_ms: default_gc_start_delay_ms(),
            gc_reauth_delay_ms: default_gc_reauth_delay_ms(),
            reconcile_interval_ms: default_reconcile_interval_ms(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            default_limit: default_limit(),
            default_order_by: default_order_by(),
            canonical_demo_tenant: default_canonical_demo_tenant(),
            canonical_demo_identity: default_canonical_demo_identity(),
            mirror_key_prefix: default_mirror_key_prefix(),
            mirror_max_entries_per_location: default_mirror_max_entries_per_location(),
        }
    }
}

impl TenantSyncConfig {
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    #[must_use]
    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sweep_interval_ms.max(1))
    }

    #[must_use]
    pub fn gc_start_delay(&self) -> Duration {
        Duration::from_millis(self.gc_start_delay_ms)
    }

    #[must_use]
    pub fn gc_reauth_delay(&self) -> Duration {
        Duration::from_millis(self.gc_reauth_delay_ms.max(1))
    }

    /// `None` when periodic reconciliation is disabled.
    #[must_use]
    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_ms > 0).then(|| Duration::from_millis(self.reconcile_interval_ms))
    }
}

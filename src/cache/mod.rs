// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query Result Cache
//!
//! TTL-bounded cache of tenant-scoped query results.
//!
//! # Flow
//!
//! ```text
//! get_cached(collection, options)
//!       │
//!       ├─→ no identity → []   (no remote call)
//!       ▼
//! ┌──────────────────────────────────────┐
//! │  normalize options → QueryShape      │
//! │  key = collection : sha256(shape)    │
//! └──────────────────────────────────────┘
//!       │
//!       ├─→ Hit + age < ttl → cached payload
//!       │
//!       └─→ Miss / expired → TenantFilter fetch
//!                 │
//!                 ├─→ ok       → store (created_at = now), return
//!                 └─→ degraded → return [] without storing
//! ```
//!
//! Entries are only removed by [`QueryCache::invalidate`],
//! [`QueryCache::clear_all`], an expired lookup, or the periodic
//! [`QueryCache::sweep_expired`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::TenantSyncConfig;
use crate::metrics;
use crate::record::Record;
use crate::storage::traits::{Filter, OrderDirection, RemoteQuery};
use crate::tenant::{IdentityProvider, TenantContext, TenantFilter};

/// Caller-facing read options.
///
/// Setting `page_size` or `page` selects a paged read; otherwise the read is
/// limited (`limit`, default ordering by the configured field).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub order_direction: Option<OrderDirection>,
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
}

fn default_use_cache() -> bool { true }

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            page_size: None,
            limit: None,
            page: None,
            filters: Vec::new(),
            order_by: None,
            order_direction: None,
            use_cache: default_use_cache(),
        }
    }
}

impl QueryOptions {
    #[must_use]
    pub fn limited(limit: usize) -> Self {
        Self { limit: Some(limit), ..Self::default() }
    }

    #[must_use]
    pub fn paged(page: usize, page_size: usize) -> Self {
        Self { page: Some(page), page_size: Some(page_size), ..Self::default() }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn ordered_by(mut self, field: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_by = Some(field.into());
        self.order_direction = Some(direction);
        self
    }

    /// Skip both cache lookup and cache store.
    #[must_use]
    pub fn bypass_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// Normalized query shape. Equivalent option sets normalize to equal shapes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum QueryShape {
    Paged {
        page_size: usize,
        page: usize,
        filters: Vec<Filter>,
        order_by: Option<String>,
        order_direction: OrderDirection,
    },
    Limited {
        limit: usize,
        filters: Vec<Filter>,
        order_by: String,
        order_direction: OrderDirection,
    },
}

impl QueryShape {
    pub fn normalize(options: &QueryOptions, config: &TenantSyncConfig) -> Self {
        let mut filters: Vec<Filter> = options
            .filters
            .iter()
            .filter(|f| !f.is_tenant_predicate())
            .cloned()
            .collect();
        filters.sort_by_key(|f| format!("{}\u{1f}{:?}\u{1f}{}", f.field, f.op, f.value));
        filters.dedup();
        let order_direction = options.order_direction.unwrap_or_default();

        if options.page_size.is_some() || options.page.is_some() {
            Self::Paged {
                page_size: options
                    .page_size
                    .unwrap_or(config.default_page_size)
                    .clamp(1, config.max_page_size.max(1)),
                page: options.page.unwrap_or(1).max(1),
                filters,
                order_by: options.order_by.clone(),
                order_direction,
            }
        } else {
            Self::Limited {
                limit: options.limit.unwrap_or(config.default_limit).max(1),
                filters,
                order_by: options
                    .order_by
                    .clone()
                    .unwrap_or_else(|| config.default_order_by.clone()),
                order_direction,
            }
        }
    }

    /// The query sent through the tenant filter.
    #[must_use]
    pub fn remote_query(&self) -> RemoteQuery {
        match self {
            Self::Paged { filters, order_by, order_direction, .. } => {
                let mut query = RemoteQuery { filters: filters.clone(), ..RemoteQuery::unscoped() };
                if let Some(field) = order_by {
                    query = query.ordered_by(field.clone(), *order_direction);
                }
                query
            }
            Self::Limited { limit, filters, order_by, order_direction } => RemoteQuery {
                filters: filters.clone(),
                ..RemoteQuery::unscoped()
            }
            .ordered_by(order_by.clone(), *order_direction)
            .limited(*limit),
        }
    }

    /// Cut the fetched result down to the requested page.
    #[must_use]
    pub fn select(&self, records: Vec<Record>) -> Vec<Record> {
        match self {
            Self::Paged { page_size, page, .. } => records
                .into_iter()
                .skip((page - 1).saturating_mul(*page_size))
                .take(*page_size)
                .collect(),
            Self::Limited { .. } => records,
        }
    }
}

/// Cache key: collection plus a digest of (tenant, shape).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub collection: String,
    pub digest: String,
}

impl CacheKey {
    pub fn derive(collection: &str, tenant_id: &str, shape: &QueryShape) -> Self {
        #[derive(Serialize)]
        struct Canonical<'a> {
            tenant: &'a str,
            shape: &'a QueryShape,
        }

        let bytes = serde_json::to_vec(&Canonical { tenant: tenant_id, shape }).unwrap_or_default();
        Self {
            collection: collection.to_string(),
            digest: hex::encode(Sha256::digest(&bytes)),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.collection, self.digest)
    }
}

/// A stored result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Vec<Record>,
    /// Clock offset at store time
    pub created_at: Duration,
    pub ttl: Duration,
}

impl CacheEntry {
    #[must_use]
    pub fn is_expired(&self, now: Duration) -> bool {
        now.saturating_sub(self.created_at) >= self.ttl
    }
}

/// Key and timestamp of one entry, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStamp {
    pub key: String,
    pub collection: String,
    pub created_at: Duration,
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Current number of entries
    pub total_entries: usize,
    /// Distinct collections represented, sorted
    pub collections: Vec<String>,
    pub oldest_entry: Option<EntryStamp>,
    pub newest_entry: Option<EntryStamp>,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Reads that went to the tenant filter
    pub remote_reads: u64,
}

/// Tenant-scoped query cache with fixed TTL.
pub struct QueryCache {
    entries: DashMap<CacheKey, CacheEntry>,
    filter: Arc<TenantFilter>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    config: TenantSyncConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    remote_reads: AtomicU64,
}

impl QueryCache {
    pub fn new(
        filter: Arc<TenantFilter>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        config: TenantSyncConfig,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            filter,
            identity,
            clock,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            remote_reads: AtomicU64::new(0),
        }
    }

    /// Read through the cache. Never fails; an empty result may mean "unknown".
    #[tracing::instrument(skip(self, options))]
    pub async fn get_cached(&self, collection: &str, options: &QueryOptions) -> Vec<Record> {
        let Some(ctx) = TenantContext::current(self.identity.as_ref(), &self.config) else {
            metrics::record_cache_lookup("no_identity");
            debug!("No caller identity, skipping remote read");
            return Vec::new();
        };

        let shape = QueryShape::normalize(options, &self.config);
        let key = CacheKey::derive(collection, &ctx.tenant_id, &shape);

        if options.use_cache {
            let now = self.clock.now();
            if let Some(entry) = self.entries.get(&key) {
                if !entry.is_expired(now) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    metrics::record_cache_lookup("hit");
                    debug!(key = %key, "Cache hit");
                    return entry.payload.clone();
                }
            }
            if self.entries.remove_if(&key, |_, e| e.is_expired(now)).is_some() {
                metrics::record_cache_evictions("ttl", 1);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_lookup("miss");
            debug!(key = %key, "Cache miss");
        } else {
            metrics::record_cache_lookup("bypass");
        }

        self.remote_reads.fetch_add(1, Ordering::Relaxed);
        let outcome = self
            .filter
            .fetch_or_empty(&ctx, collection, &shape.remote_query())
            .await;
        let records = shape.select(outcome.records);

        if options.use_cache && !outcome.degraded {
            self.entries.insert(
                key.clone(),
                CacheEntry {
                    key,
                    payload: records.clone(),
                    created_at: self.clock.now(),
                    ttl: self.config.cache_ttl(),
                },
            );
            metrics::set_cache_entries(self.entries.len());
        }
        records
    }

    /// Drop every entry of `collection`. Returns how many were dropped.
    pub fn invalidate(&self, collection: &str) -> usize {
        let mut dropped = 0;
        self.entries.retain(|key, _| {
            let keep = key.collection != collection;
            if !keep {
                dropped += 1;
            }
            keep
        });
        if dropped > 0 {
            debug!(collection, dropped, "Cache invalidated");
        }
        metrics::record_cache_evictions("invalidate", dropped);
        metrics::set_cache_entries(self.entries.len());
        dropped
    }

    /// Drop every entry.
    pub fn clear_all(&self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        metrics::record_cache_evictions("clear", dropped);
        metrics::set_cache_entries(0);
        dropped
    }

    /// Remove every expired entry, independent of read traffic.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut expired = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                expired += 1;
            }
            keep
        });
        if expired > 0 {
            info!(expired, remaining = self.entries.len(), "Expired cache entries swept");
        }
        metrics::record_cache_evictions("ttl", expired);
        metrics::set_cache_entries(self.entries.len());
        expired
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Diagnostics snapshot. No side effects.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let mut collections = BTreeSet::new();
        let mut oldest: Option<EntryStamp> = None;
        let mut newest: Option<EntryStamp> = None;

        for entry in self.entries.iter() {
            collections.insert(entry.key.collection.clone());
            let stamp = EntryStamp {
                key: entry.key.to_string(),
                collection: entry.key.collection.clone(),
                created_at: entry.created_at,
            };
            if oldest.as_ref().map_or(true, |o| stamp.created_at < o.created_at) {
                oldest = Some(stamp.clone());
            }
            if newest.as_ref().map_or(true, |n| stamp.created_at > n.created_at) {
                newest = Some(stamp);
            }
        }

        CacheStats {
            total_entries: self.entries.len(),
            collections: collections.into_iter().collect(),
            oldest_entry: oldest,
            newest_entry: newest,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            remote_reads: self.remote_reads.load(Ordering::Relaxed),
        }
    }
}

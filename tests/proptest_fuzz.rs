//! Property-based tests (fuzzing) for tenant isolation and reconciliation.
//!
//! Uses proptest to generate random record sets, query shapes and corrupt
//! local data, and verifies the layer never leaks across tenants, never
//! panics, and reports exactly the set difference between the two stores.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{json, Value};

use tenant_sync::verify::symmetric_difference;
use tenant_sync::{
    CacheKey, Filter, GarbageCollector, Identity, InMemoryKv, InMemoryRemote, InconsistencyKind,
    KeyValueStorage, LocalMirror, MirrorLocation, QueryOptions, QueryShape, Record, RemoteQuery,
    SchemaRegistry, SessionIdentity, TenantContext, TenantFilter, TenantSyncConfig,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn tenant_strategy() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        Just(Some("t1".to_string())),
        Just(Some("t2".to_string())),
        Just(Some("demo_tenant".to_string())),
        Just(Some(String::new())),
    ]
}

/// Records with a random tenant tag, owner and deletion flag
fn record_strategy() -> impl Strategy<Value = Record> {
    ("[a-z0-9]{1,6}", tenant_strategy(), proptest::option::of("u[0-9]"), any::<bool>()).prop_map(
        |(id, tenant, owner, deleted)| {
            let mut record = Record::new(id);
            record.tenant_id = tenant;
            record.owner_id = owner;
            record.deleted = deleted;
            record
        },
    )
}

fn identity_strategy() -> impl Strategy<Value = Identity> {
    (
        prop_oneof![Just("t1"), Just("t2"), Just("demo_tenant"), Just("")],
        prop_oneof![Just("ops@acme.test"), Just("DEMO@TitanFleet.com")],
    )
        .prop_map(|(tenant, email)| Identity::new("uid-x").with_email(email).with_tenant(tenant))
}

fn id_set_strategy() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set("[a-e][0-9]", 0..12)
}

fn filter_strategy() -> impl Strategy<Value = Filter> {
    (
        prop_oneof![Just("estado"), Just("cliente"), Just("tenantId"), Just("monto")],
        prop_oneof![Just(json!("abierto")), Just(json!(3)), Just(json!(true))],
    )
        .prop_map(|(field, value)| Filter::eq(field, value))
}

/// Generate arbitrary JSON values (including invalid structures)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::hash_map(
                prop_oneof![
                    Just("id".to_string()),
                    Just("tenantId".to_string()),
                    Just("userId".to_string()),
                    Just("deleted".to_string()),
                    "[a-z]{1,6}",
                ],
                inner,
                0..6
            )
            .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

// =============================================================================
// Tenant isolation
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn fuzz_visible_records_respect_tenant_boundary(
        records in prop::collection::vec(record_strategy(), 0..30),
        identity in identity_strategy(),
    ) {
        let config = TenantSyncConfig::default();
        let ctx = TenantContext::derive(&identity, &config);

        for record in records.iter().filter(|r| ctx.can_see(r)) {
            prop_assert!(!record.deleted);
            match record.tenant() {
                Some(tenant) => prop_assert_eq!(tenant, ctx.tenant_id.as_str()),
                None => prop_assert!(ctx.is_canonical_demo_tenant),
            }
        }
    }

    #[test]
    fn fuzz_tenant_filter_never_leaks(
        records in prop::collection::vec(record_strategy(), 0..30),
        identity in identity_strategy(),
        filters in prop::collection::vec(filter_strategy(), 0..3),
        deny_scoped in any::<bool>(),
    ) {
        let config = TenantSyncConfig::default();
        let ctx = TenantContext::derive(&identity, &config);

        let remote = Arc::new(InMemoryRemote::new());
        for record in records {
            remote.insert("logistica", record);
        }
        if deny_scoped {
            remote.set_access(tenant_sync::AccessRule::DenyFiltered);
        }

        let mut query = RemoteQuery::unscoped();
        for filter in filters {
            query = query.with_filter(filter);
        }

        let filter = TenantFilter::new(remote);
        let outcome = runtime().block_on(filter.fetch_or_empty(&ctx, "logistica", &query));

        for record in &outcome.records {
            prop_assert!(ctx.can_see(record));
        }
        if outcome.degraded {
            prop_assert!(outcome.records.is_empty());
        }
    }
}

// =============================================================================
// Cache keys
// =============================================================================

proptest! {
    #[test]
    fn fuzz_cache_key_ignores_filter_order(
        filters in prop::collection::vec(filter_strategy(), 0..5),
        limit in 1usize..50,
    ) {
        let config = TenantSyncConfig::default();
        let mut forward = QueryOptions::limited(limit);
        let mut backward = QueryOptions::limited(limit);
        for f in &filters {
            forward = forward.with_filter(f.clone());
        }
        for f in filters.iter().rev() {
            backward = backward.with_filter(f.clone());
        }

        let a = CacheKey::derive("cxc", "t1", &QueryShape::normalize(&forward, &config));
        let b = CacheKey::derive("cxc", "t1", &QueryShape::normalize(&backward, &config));
        prop_assert_eq!(a, b);
    }

    #[test]
    fn fuzz_cache_key_separates_tenants(
        tenant_a in "[a-z]{1,8}",
        tenant_b in "[a-z]{1,8}",
        page in 1usize..20,
    ) {
        let config = TenantSyncConfig::default();
        let shape = QueryShape::normalize(&QueryOptions::paged(page, 10), &config);

        let a = CacheKey::derive("trafico", &tenant_a, &shape);
        let b = CacheKey::derive("trafico", &tenant_b, &shape);
        prop_assert_eq!(a == b, tenant_a == tenant_b);
        prop_assert_eq!(a.collection.as_str(), "trafico");
    }
}

// =============================================================================
// Set difference
// =============================================================================

proptest! {
    #[test]
    fn fuzz_symmetric_difference_is_exact(
        local in id_set_strategy(),
        remote in id_set_strategy(),
    ) {
        let found = symmetric_difference("cxp", &local, &remote);

        let missing_remote: BTreeSet<String> = found
            .iter()
            .filter(|i| i.kind == InconsistencyKind::MissingInRemote)
            .map(|i| i.entity_id.clone())
            .collect();
        let missing_local: BTreeSet<String> = found
            .iter()
            .filter(|i| i.kind == InconsistencyKind::MissingInLocal)
            .map(|i| i.entity_id.clone())
            .collect();

        let expected_remote: BTreeSet<String> = local.difference(&remote).cloned().collect();
        let expected_local: BTreeSet<String> = remote.difference(&local).cloned().collect();
        prop_assert_eq!(&missing_remote, &expected_remote);
        prop_assert_eq!(&missing_local, &expected_local);
        prop_assert_eq!(found.len(), missing_remote.len() + missing_local.len());
        prop_assert_eq!(found.is_empty(), local == remote);
        prop_assert!(found.iter().all(|i| i.module == "cxp"));
    }
}

// =============================================================================
// Corrupt local data
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn fuzz_mirror_never_panics_on_arbitrary_json(value in arbitrary_json_strategy()) {
        let kv = Arc::new(InMemoryKv::new());
        let text = value.to_string();
        kv.set("erp_logistica", &text).unwrap();
        kv.set("erp_shared_data", &text).unwrap();

        let mirror = LocalMirror::new(kv.clone(), 100);
        let key = MirrorLocation::Key("erp_logistica".into());
        let section = MirrorLocation::Section {
            key: "erp_shared_data".into(),
            section: "registros".into(),
        };

        for location in [&key, &section] {
            let _ = mirror.load(location);
            let _ = mirror.retain(location, |r| r.tenant_id.is_some());
        }
    }

    #[test]
    fn fuzz_gc_never_panics_and_converges(
        entries in prop::collection::vec(arbitrary_json_strategy(), 0..10),
        identity in identity_strategy(),
    ) {
        let kv = Arc::new(InMemoryKv::new());
        kv.set("erp_cxc_data", &Value::Array(entries).to_string()).unwrap();

        let config = TenantSyncConfig::default();
        let gc = GarbageCollector::new(
            Arc::new(LocalMirror::new(kv.clone(), 100)),
            Arc::new(SessionIdentity::signed_in(identity)),
            Arc::new(SchemaRegistry::standard("erp_")),
            config,
        );

        let first = gc.run().unwrap();
        let second = gc.run().unwrap();
        prop_assert_eq!(second.removed, 0);
        prop_assert_eq!(second.skipped_malformed, first.skipped_malformed);
    }
}

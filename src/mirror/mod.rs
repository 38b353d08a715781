//! Local mirror: typed access to module records in local key-value storage.
//!
//! A [`MirrorLocation`] is either a dedicated key or one section of a shared
//! document. Either way the records sit in a container that is a JSON array
//! or a JSON object keyed by record id; rewrites keep the container shape.
//!
//! Parsing is per entry. A value that is not a record is counted as
//! malformed, skipped, and written back untouched. A container that cannot
//! be parsed at all surfaces as [`StorageError::MalformedEntry`] and is never
//! rewritten.
//!
//! Every read-modify-write goes through one mutex so concurrent sweeps and
//! writes cannot lose each other's updates.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::metrics;
use crate::record::{MirrorLocation, ModuleSchema, Record};
use crate::storage::traits::{KeyValueStorage, StorageError};

/// Field stamped on records written through [`LocalMirror::put`].
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// A parsed record and where it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorEntry {
    pub location: MirrorLocation,
    pub record: Record,
}

/// Records of one location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedLocation {
    pub records: Vec<Record>,
    /// Entries that failed to parse
    pub malformed: usize,
}

/// Records of every location of a module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleSnapshot {
    pub entries: Vec<MirrorEntry>,
    /// Malformed entries plus unparseable locations
    pub malformed: usize,
}

impl ModuleSnapshot {
    /// Business ids present locally, resolved through the module's id chain.
    #[must_use]
    pub fn ids(&self, schema: &ModuleSchema) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter_map(|e| schema.identify(&e.record))
            .collect()
    }
}

/// Outcome of [`LocalMirror::retain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetainOutcome {
    pub removed: usize,
    pub malformed: usize,
}

enum Container {
    List(Vec<Value>),
    Map(Map<String, Value>),
}

impl Container {
    fn parse(value: Value, label: &str) -> Result<Self, StorageError> {
        match value {
            Value::Array(items) => Ok(Self::List(items)),
            Value::Object(map) => Ok(Self::Map(map)),
            Value::Null => Ok(Self::Map(Map::new())),
            other => Err(StorageError::MalformedEntry {
                key: label.to_string(),
                reason: format!("expected array or object, found {}", type_name(&other)),
            }),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::List(items) => items.len(),
            Self::Map(map) => map.len(),
        }
    }

    fn values(&self) -> Vec<&Value> {
        match self {
            Self::List(items) => items.iter().collect(),
            Self::Map(map) => map.values().collect(),
        }
    }

    /// Keep values for which `keep` returns true. Returns how many were dropped.
    fn retain(&mut self, mut keep: impl FnMut(&Value) -> bool) -> usize {
        let before = self.len();
        match self {
            Self::List(items) => items.retain(|v| keep(v)),
            Self::Map(map) => map.retain(|_, v| keep(&*v)),
        }
        before - self.len()
    }

    /// Insert `value` under `id`, replacing any entry the schema resolves to `id`.
    fn upsert(&mut self, schema: &ModuleSchema, id: &str, value: Value) {
        let same_id = |v: &Value| {
            Record::from_value(v.clone())
                .ok()
                .and_then(|r| schema.identify(&r))
                .as_deref()
                == Some(id)
        };
        match self {
            Self::List(items) => match items.iter().position(|v| same_id(v)) {
                Some(pos) => items[pos] = value,
                None => items.push(value),
            },
            Self::Map(map) => {
                map.retain(|k, v| k != id && !same_id(&*v));
                map.insert(id.to_string(), value);
            }
        }
    }

    fn into_value(self) -> Value {
        match self {
            Self::List(items) => Value::Array(items),
            Self::Map(map) => Value::Object(map),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// An opened location: the container plus, for sections, the enclosing document.
struct Opened {
    container: Container,
    document: Option<Map<String, Value>>,
}

/// Typed view over the local key-value storage.
pub struct LocalMirror {
    storage: Arc<dyn KeyValueStorage>,
    max_entries: usize,
    write_lock: Mutex<()>,
}

impl LocalMirror {
    pub fn new(storage: Arc<dyn KeyValueStorage>, max_entries: usize) -> Self {
        Self {
            storage,
            max_entries: max_entries.max(1),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn KeyValueStorage> {
        &self.storage
    }

    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Parse the records stored at one location.
    pub fn load(&self, location: &MirrorLocation) -> Result<LoadedLocation, StorageError> {
        let opened = self.open(location)?;
        let mut loaded = LoadedLocation::default();
        for value in opened.container.values() {
            match Record::from_value(value.clone()) {
                Ok(record) => loaded.records.push(record),
                Err(_) => loaded.malformed += 1,
            }
        }
        Ok(loaded)
    }

    /// Parse every location of a module. Unparseable locations are skipped.
    pub fn load_module(&self, schema: &ModuleSchema) -> Result<ModuleSnapshot, StorageError> {
        let mut snapshot = ModuleSnapshot::default();
        for location in &schema.locations {
            match self.load(location) {
                Ok(loaded) => {
                    snapshot.malformed += loaded.malformed;
                    snapshot.entries.extend(loaded.records.into_iter().map(|record| MirrorEntry {
                        location: location.clone(),
                        record,
                    }));
                }
                Err(e @ StorageError::MalformedEntry { .. }) => {
                    warn!(location = %location, error = %e, "Skipping unreadable mirror location");
                    snapshot.malformed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        metrics::record_malformed_entries(snapshot.malformed);
        Ok(snapshot)
    }

    /// Find a record of a module by business id.
    pub fn get(&self, schema: &ModuleSchema, id: &str) -> Result<Option<MirrorEntry>, StorageError> {
        let snapshot = self.load_module(schema)?;
        Ok(snapshot
            .entries
            .into_iter()
            .find(|e| schema.identify(&e.record).as_deref() == Some(id)))
    }

    /// Delete, in place, every parseable record at `location` for which `keep`
    /// returns false. Malformed entries are kept.
    pub fn retain(
        &self,
        location: &MirrorLocation,
        mut keep: impl FnMut(&Record) -> bool,
    ) -> Result<RetainOutcome, StorageError> {
        let _guard = self.write_lock.lock();
        let mut opened = self.open(location)?;

        let mut malformed = 0;
        let removed = opened.container.retain(|value| match Record::from_value(value.clone()) {
            Ok(record) => keep(&record),
            Err(_) => {
                malformed += 1;
                true
            }
        });

        if removed > 0 {
            self.save(location, opened)?;
            debug!(location = %location, removed, "Mirror location rewritten");
        }
        Ok(RetainOutcome { removed, malformed })
    }

    /// Delete every record of the module whose business id is in `ids`.
    pub fn remove_ids(&self, schema: &ModuleSchema, ids: &BTreeSet<String>) -> Result<usize, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut removed = 0;
        for location in &schema.locations {
            let outcome = self.retain(location, |record| {
                schema.identify(record).map_or(true, |id| !ids.contains(&id))
            });
            match outcome {
                Ok(outcome) => removed += outcome.removed,
                Err(e @ StorageError::MalformedEntry { .. }) => {
                    warn!(location = %location, error = %e, "Skipping unreadable mirror location");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    /// Write a record to the module's primary location, keyed by business id.
    ///
    /// Stamps `updatedAt` when absent. When the location exceeds its capacity
    /// the records with the oldest `updatedAt` are evicted, unstamped first.
    pub fn put(&self, schema: &ModuleSchema, mut record: Record) -> Result<String, StorageError> {
        let Some(location) = schema.locations.first() else {
            return Err(StorageError::UnknownModule(format!("{} has no mirror location", schema.name)));
        };
        let id = schema.identify(&record).ok_or_else(|| StorageError::MalformedEntry {
            key: location.to_string(),
            reason: "record has no identifier".to_string(),
        })?;

        if !record.fields.contains_key(UPDATED_AT_FIELD) {
            record
                .fields
                .insert(UPDATED_AT_FIELD.to_string(), Value::from(epoch_millis()));
        }
        let value = record.to_value().map_err(|e| StorageError::MalformedEntry {
            key: location.to_string(),
            reason: e.to_string(),
        })?;

        let _guard = self.write_lock.lock();
        let mut opened = self.open(location)?;
        opened.container.upsert(schema, &id, value);

        let evicted = self.enforce_capacity(&mut opened.container);
        if evicted > 0 {
            metrics::record_mirror_evictions(evicted);
            debug!(location = %location, evicted, "Mirror location over capacity");
        }

        self.save(location, opened)?;
        Ok(id)
    }

    fn enforce_capacity(&self, container: &mut Container) -> usize {
        let excess = container.len().saturating_sub(self.max_entries);
        if excess == 0 {
            return 0;
        }

        // Only parseable records are candidates; unstamped ones sort first.
        let mut stamps: Vec<Option<i64>> = container
            .values()
            .into_iter()
            .filter(|v| Record::from_value((*v).clone()).is_ok())
            .map(updated_at)
            .collect();
        stamps.sort();
        let target = excess.min(stamps.len());
        let Some(&cutoff) = stamps.get(target.saturating_sub(1)) else {
            return 0;
        };
        let strictly_older = stamps.iter().filter(|s| **s < cutoff).count();
        let mut ties = target - strictly_older;

        container.retain(|value| {
            if Record::from_value(value.clone()).is_err() {
                return true;
            }
            let stamp = updated_at(value);
            if stamp < cutoff {
                false
            } else if stamp == cutoff && ties > 0 {
                ties -= 1;
                false
            } else {
                true
            }
        })
    }

    fn open(&self, location: &MirrorLocation) -> Result<Opened, StorageError> {
        let key = location.storage_key();
        let parsed = match self.storage.get(key)? {
            Some(text) => serde_json::from_str::<Value>(&text).map_err(|e| StorageError::MalformedEntry {
                key: key.to_string(),
                reason: e.to_string(),
            })?,
            None => Value::Null,
        };

        match location {
            MirrorLocation::Key(_) => Ok(Opened {
                container: Container::parse(parsed, key)?,
                document: None,
            }),
            MirrorLocation::Section { section, .. } => {
                let mut document = match parsed {
                    Value::Object(map) => map,
                    Value::Null => Map::new(),
                    other => {
                        return Err(StorageError::MalformedEntry {
                            key: key.to_string(),
                            reason: format!("expected object, found {}", type_name(&other)),
                        })
                    }
                };
                let inner = document.remove(section).unwrap_or(Value::Null);
                Ok(Opened {
                    container: Container::parse(inner, &location.to_string())?,
                    document: Some(document),
                })
            }
        }
    }

    fn save(&self, location: &MirrorLocation, opened: Opened) -> Result<(), StorageError> {
        let value = match (location, opened.document) {
            (MirrorLocation::Section { section, .. }, Some(mut document)) => {
                document.insert(section.clone(), opened.container.into_value());
                Value::Object(document)
            }
            _ => opened.container.into_value(),
        };
        let text = serde_json::to_string(&value).map_err(|e| StorageError::MalformedEntry {
            key: location.storage_key().to_string(),
            reason: e.to_string(),
        })?;
        self.storage.set(location.storage_key(), &text)
    }
}

fn updated_at(value: &Value) -> Option<i64> {
    value.get(UPDATED_AT_FIELD).and_then(Value::as_i64)
}

fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SchemaRegistry;
    use crate::storage::kv::InMemoryKv;
    use serde_json::json;

    fn setup(max: usize) -> (Arc<InMemoryKv>, LocalMirror, SchemaRegistry) {
        let kv = Arc::new(InMemoryKv::new());
        let mirror = LocalMirror::new(kv.clone(), max);
        (kv, mirror, SchemaRegistry::standard("erp_"))
    }

    fn stored(kv: &InMemoryKv, key: &str) -> Value {
        serde_json::from_str(&kv.get(key).unwrap().unwrap()).unwrap()
    }

    #[test]
    fn test_load_array_and_object_containers() {
        let (kv, mirror, _) = setup(100);
        kv.set("erp_cxc_data", r#"[{"id":"1","tenantId":"t1"},{"id":"2"}]"#).unwrap();
        kv.set("erp_logistica", r#"{"A":{"id":"A"},"B":{"numeroRegistro":7}}"#).unwrap();

        let cxc = mirror.load(&MirrorLocation::Key("erp_cxc_data".into())).unwrap();
        assert_eq!(cxc.records.len(), 2);
        assert_eq!(cxc.malformed, 0);

        let logistica = mirror.load(&MirrorLocation::Key("erp_logistica".into())).unwrap();
        assert_eq!(logistica.records.len(), 2);

        let missing = mirror.load(&MirrorLocation::Key("erp_nothing".into())).unwrap();
        assert!(missing.records.is_empty());
    }

    #[test]
    fn test_malformed_entries_are_counted_and_kept() {
        let (kv, mirror, _) = setup(100);
        let location = MirrorLocation::Key("erp_cxp_data".into());
        kv.set("erp_cxp_data", r#"[{"id":"1","deleted":true},"garbage",42,{"id":"2"}]"#).unwrap();

        let loaded = mirror.load(&location).unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.malformed, 2);

        let outcome = mirror.retain(&location, |r| !r.deleted).unwrap();
        assert_eq!(outcome, RetainOutcome { removed: 1, malformed: 2 });
        assert_eq!(stored(&kv, "erp_cxp_data"), json!(["garbage", 42, {"id": "2"}]));
    }

    #[test]
    fn test_unparseable_container_is_an_error_and_untouched() {
        let (kv, mirror, registry) = setup(100);
        kv.set("erp_cxc_data", "{not json").unwrap();
        let location = MirrorLocation::Key("erp_cxc_data".into());

        assert!(matches!(mirror.load(&location), Err(StorageError::MalformedEntry { .. })));
        assert!(mirror.retain(&location, |_| false).is_err());
        assert_eq!(kv.get("erp_cxc_data").unwrap().as_deref(), Some("{not json"));

        let snapshot = mirror.load_module(registry.get("cxc").unwrap()).unwrap();
        assert!(snapshot.entries.is_empty());
        assert_eq!(snapshot.malformed, 1);
    }

    #[test]
    fn test_section_rewrite_preserves_other_sections() {
        let (kv, mirror, registry) = setup(100);
        kv.set(
            "erp_shared_data",
            r#"{"registros":{"1":{"id":"1","tenantId":"t2"},"2":{"id":"2","tenantId":"t1"}},"facturas":{"9":{"id":"9","tenantId":"t2"}},"config":{"theme":"dark"}}"#,
        )
        .unwrap();

        let location = registry.get("logistica").unwrap().locations[1].clone();
        let outcome = mirror
            .retain(&location, |r| r.tenant_id.as_deref() == Some("t1"))
            .unwrap();
        assert_eq!(outcome.removed, 1);

        let doc = stored(&kv, "erp_shared_data");
        assert_eq!(doc["registros"], json!({"2": {"id": "2", "tenantId": "t1"}}));
        assert_eq!(doc["facturas"]["9"]["tenantId"], "t2");
        assert_eq!(doc["config"]["theme"], "dark");
    }

    #[test]
    fn test_module_snapshot_spans_locations() {
        let (kv, mirror, registry) = setup(100);
        let schema = registry.get("logistica").unwrap();
        kv.set("erp_logistica", r#"[{"id":"1"}]"#).unwrap();
        kv.set("erp_shared_data", r#"{"registros":{"2500002":{"numeroRegistro":"2500002"}}}"#).unwrap();

        let snapshot = mirror.load_module(schema).unwrap();
        assert_eq!(snapshot.entries.len(), 2);
        let ids: Vec<String> = snapshot.ids(schema).into_iter().collect();
        assert_eq!(ids, vec!["1", "2500002"]);

        let found = mirror.get(schema, "2500002").unwrap().unwrap();
        assert_eq!(found.location, schema.locations[1]);
        assert!(mirror.get(schema, "404").unwrap().is_none());
    }

    #[test]
    fn test_remove_ids_across_locations() {
        let (kv, mirror, registry) = setup(100);
        let schema = registry.get("logistica").unwrap();
        kv.set("erp_logistica", r#"[{"id":"1"},{"id":"2"}]"#).unwrap();
        kv.set("erp_shared_data", r#"{"registros":{"x":{"numeroRegistro":"2"}}}"#).unwrap();

        let ids: BTreeSet<String> = ["2".to_string()].into_iter().collect();
        assert_eq!(mirror.remove_ids(schema, &ids).unwrap(), 2);
        assert_eq!(stored(&kv, "erp_logistica"), json!([{"id": "1"}]));
        assert_eq!(stored(&kv, "erp_shared_data"), json!({"registros": {}}));

        assert_eq!(mirror.remove_ids(schema, &ids).unwrap(), 0);
    }

    #[test]
    fn test_put_keys_by_id_and_stamps() {
        let (kv, mirror, registry) = setup(100);
        let schema = registry.get("mantenimiento").unwrap();

        let id = mirror.put(schema, Record::new("M-1").with_tenant("t1")).unwrap();
        assert_eq!(id, "M-1");

        let doc = stored(&kv, "erp_mantenimiento");
        assert_eq!(doc["M-1"]["tenantId"], "t1");
        assert!(doc["M-1"]["updatedAt"].is_i64());

        mirror
            .put(schema, Record::new("M-1").with_field("updatedAt", json!(5)))
            .unwrap();
        let doc = stored(&kv, "erp_mantenimiento");
        assert_eq!(doc.as_object().unwrap().len(), 1);
        assert_eq!(doc["M-1"]["updatedAt"], 5);
    }

    #[test]
    fn test_put_preserves_array_shape() {
        let (kv, mirror, registry) = setup(100);
        let schema = registry.get("cxc").unwrap();
        kv.set("erp_cxc_data", r#"[{"id":"1","monto":1}]"#).unwrap();

        mirror.put(schema, Record::new("1").with_field("monto", json!(2))).unwrap();
        mirror.put(schema, Record::new("2")).unwrap();

        let doc = stored(&kv, "erp_cxc_data");
        let items = doc.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["monto"], 2);
    }

    #[test]
    fn test_put_without_identifier_fails() {
        let (_, mirror, registry) = setup(100);
        let schema = registry.get("cxc").unwrap();
        let anonymous = Record::from_value(json!({"monto": 3})).unwrap();

        assert!(matches!(mirror.put(schema, anonymous), Err(StorageError::MalformedEntry { .. })));
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let (kv, mirror, registry) = setup(3);
        let schema = registry.get("diesel").unwrap();
        kv.set(
            "erp_diesel_movimientos",
            r#"[{"id":"old","updatedAt":10},{"id":"unstamped"},{"id":"new","updatedAt":30}]"#,
        )
        .unwrap();

        mirror.put(schema, Record::new("mid").with_field("updatedAt", json!(20))).unwrap();
        let ids: Vec<String> = mirror
            .load(&schema.locations[0])
            .unwrap()
            .records
            .iter()
            .filter_map(|r| r.id_component("id"))
            .collect();
        assert_eq!(ids, vec!["old", "new", "mid"]);

        mirror.put(schema, Record::new("newest").with_field("updatedAt", json!(40))).unwrap();
        let ids: Vec<String> = mirror
            .load(&schema.locations[0])
            .unwrap()
            .records
            .iter()
            .filter_map(|r| r.id_component("id"))
            .collect();
        assert_eq!(ids, vec!["new", "mid", "newest"]);
    }
}

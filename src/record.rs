// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Records and per-module schemas.
//!
//! A [`Record`] is the shape shared by the remote store of record and the
//! local mirror. Only the fields this layer reasons about are typed
//! (`tenantId`, `userId`, `deleted`); everything else is kept verbatim in
//! [`Record::fields`].
//!
//! Business identifiers are not looked up ad hoc. Each module declares an
//! ordered chain of identifier fields in its [`ModuleSchema`], and
//! [`ModuleSchema::identify`] is the only place the chain is walked.
//!
//! # Example
//!
//! ```
//! use tenant_sync::{ModuleSchema, Record};
//! use serde_json::json;
//!
//! let schema = ModuleSchema::new("logistica", "erp_");
//! let record = Record::from_value(json!({
//!     "numeroRegistro": 2500002,
//!     "tenantId": "t1",
//! })).unwrap();
//!
//! assert_eq!(schema.identify(&record).as_deref(), Some("2500002"));
//! assert_eq!(record.tenant_id.as_deref(), Some("t1"));
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Identifier chain used when a module does not declare its own.
pub const DEFAULT_ID_FIELDS: [&str; 3] = ["id", "numeroRegistro", "registroId"];

/// Storage key of the document shared between several modules.
pub const SHARED_DATA_KEY: &str = "shared_data";

/// A document as stored remotely or mirrored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Owning tenant; absent on legacy/demo records
    #[serde(
        rename = "tenantId",
        default,
        deserialize_with = "non_empty_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub tenant_id: Option<String>,
    /// Owning identity marker (user id of the creator)
    #[serde(
        rename = "userId",
        default,
        deserialize_with = "non_empty_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_id: Option<String>,
    /// Soft-delete flag
    #[serde(default, deserialize_with = "bool_or_null")]
    pub deleted: bool,
    /// Every other field, verbatim
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

fn bool_or_null<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

/// Legacy records carry `""` where the marker was never set.
fn non_empty_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|s| !s.is_empty()))
}

impl Record {
    /// Create a live record with the given `id` field.
    pub fn new(id: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("id".to_string(), Value::String(id.into()));
        Self {
            tenant_id: None,
            owner_id: None,
            deleted: false,
            fields,
        }
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn mark_deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    /// Owning tenant, with an empty tag read as absent.
    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        self.tenant_id.as_deref().filter(|t| !t.is_empty())
    }

    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.owner_id.as_deref().filter(|o| !o.is_empty())
    }

    /// Parse a record from an arbitrary JSON value.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Value of a field by its stored name, including the typed ones.
    #[must_use]
    pub fn value_of(&self, field: &str) -> Option<Value> {
        match field {
            "tenantId" => self.tenant_id.clone().map(Value::String),
            "userId" => self.owner_id.clone().map(Value::String),
            "deleted" => Some(Value::Bool(self.deleted)),
            other => self.fields.get(other).cloned(),
        }
    }

    /// Field rendered as an identifier string.
    ///
    /// Strings and numbers qualify; empty strings, nulls and structured
    /// values do not.
    #[must_use]
    pub fn id_component(&self, field: &str) -> Option<String> {
        match self.fields.get(field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Where a module's records live in the local key-value storage.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MirrorLocation {
    /// A dedicated key holding a JSON array or an id-keyed JSON object
    Key(String),
    /// One section of a shared JSON document
    Section { key: String, section: String },
}

impl MirrorLocation {
    /// The storage key that must be read to reach this location.
    #[must_use]
    pub fn storage_key(&self) -> &str {
        match self {
            Self::Key(key) | Self::Section { key, .. } => key,
        }
    }
}

impl fmt::Display for MirrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{}", key),
            Self::Section { key, section } => write!(f, "{}#{}", key, section),
        }
    }
}

/// Declared shape of one business module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSchema {
    /// Module name (e.g. `logistica`)
    pub name: String,
    /// Remote collection backing the module
    pub collection: String,
    /// Local mirror locations, the first one receives writes
    pub locations: Vec<MirrorLocation>,
    /// Ordered identifier chain
    pub id_fields: Vec<String>,
}

impl ModuleSchema {
    /// Schema with a single `<prefix><name>` location and the default id chain.
    pub fn new(name: impl Into<String>, prefix: &str) -> Self {
        let name = name.into();
        Self {
            collection: name.clone(),
            locations: vec![MirrorLocation::Key(format!("{}{}", prefix, name))],
            id_fields: DEFAULT_ID_FIELDS.iter().map(|f| f.to_string()).collect(),
            name,
        }
    }

    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    #[must_use]
    pub fn with_locations(mut self, locations: Vec<MirrorLocation>) -> Self {
        self.locations = locations;
        self
    }

    #[must_use]
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_fields.push(field.into());
        self
    }

    /// Resolve the business identifier of a record through the id chain.
    #[must_use]
    pub fn identify(&self, record: &Record) -> Option<String> {
        self.id_fields.iter().find_map(|field| record.id_component(field))
    }
}

/// The set of modules known to this layer.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    modules: Vec<ModuleSchema>,
    /// Swept by garbage collection but never verified
    gc_locations: Vec<MirrorLocation>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The ten business modules of the ERP client and their mirror layout.
    #[must_use]
    pub fn standard(prefix: &str) -> Self {
        let key = |suffix: &str| MirrorLocation::Key(format!("{}{}", prefix, suffix));
        let shared = |section: &str| MirrorLocation::Section {
            key: format!("{}{}", prefix, SHARED_DATA_KEY),
            section: section.to_string(),
        };

        let mut registry = Self::new();
        registry
            .register(ModuleSchema::new("logistica", prefix)
                .with_locations(vec![key("logistica"), shared("registros")]))
            .register(ModuleSchema::new("trafico", prefix)
                .with_locations(vec![key("trafico"), shared("trafico")]))
            .register(ModuleSchema::new("facturacion", prefix)
                .with_locations(vec![key("facturacion"), shared("facturas")]))
            .register(ModuleSchema::new("operadores", prefix)
                .with_locations(vec![key("operadores_gastos"), key("operadores_incidencias")])
                .with_id_field("gastoId"))
            .register(ModuleSchema::new("diesel", prefix)
                .with_locations(vec![key("diesel_movimientos")]))
            .register(ModuleSchema::new("mantenimiento", prefix))
            .register(ModuleSchema::new("tesoreria", prefix)
                .with_locations(vec![key("tesoreria_movimientos")]))
            .register(ModuleSchema::new("cxc", prefix)
                .with_locations(vec![key("cxc_data")]))
            .register(ModuleSchema::new("cxp", prefix)
                .with_locations(vec![key("cxp_data")]))
            .register(ModuleSchema::new("inventario", prefix)
                .with_locations(vec![key("inventario"), key("inv")]));

        // Legacy stores the client still writes to without a module owning them
        let mut legacy: Vec<MirrorLocation> = [
            "facturacion", "diesel", "mantenimiento", "tesoreria", "cxc", "cxp", "inventario",
            "incidencias",
        ]
        .into_iter()
        .map(shared)
        .collect();
        legacy.extend(["cxc", "cxp", "mantenimientos"].into_iter().map(key));
        registry.with_gc_locations(legacy)
    }

    /// Add locations that garbage collection sweeps in addition to the
    /// module locations.
    #[must_use]
    pub fn with_gc_locations(mut self, locations: impl IntoIterator<Item = MirrorLocation>) -> Self {
        for location in locations {
            if !self.gc_locations.contains(&location) {
                self.gc_locations.push(location);
            }
        }
        self
    }

    /// Add a module, replacing any previous schema with the same name.
    pub fn register(&mut self, schema: ModuleSchema) -> &mut Self {
        self.modules.retain(|m| m.name != schema.name);
        self.modules.push(schema);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ModuleSchema> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleSchema> {
        self.modules.iter()
    }

    #[must_use]
    pub fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name.clone()).collect()
    }

    /// Every distinct mirror location across all modules.
    #[must_use]
    pub fn locations(&self) -> BTreeSet<MirrorLocation> {
        self.modules
            .iter()
            .flat_map(|m| m.locations.iter().cloned())
            .collect()
    }

    /// Module locations plus the extra garbage collection locations.
    #[must_use]
    pub fn gc_locations(&self) -> BTreeSet<MirrorLocation> {
        let mut all = self.locations();
        all.extend(self.gc_locations.iter().cloned());
        all
    }
}

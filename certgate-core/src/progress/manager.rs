//! Progress data manager
//!
//! Owns the project document stored under [`DATA_KEY`]:
//!
//! ```json
//! {
//!   "productos": { "<name>": ... },
//!   "modulos": {
//!     "<moduleKey>": {
//!       "formData": {}, "objetivosParticulares": [], "desarrollo": [],
//!       "avance": 0, "completed": false, "lastUpdate": "..."
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::store::KeyValueStore;
use crate::error::Error;
use crate::Result;

/// Storage key of the project document
pub const DATA_KEY: &str = "EC0301_ProyectoData";

const MODULES: &str = "modulos";
const PRODUCTS: &str = "productos";
const LAST_UPDATE: &str = "lastUpdate";
const LEGACY_COMPLETED: &str = "completado";

/// A manager shared between a form and its pending auto-save
pub type SharedProgress<S> = Arc<Mutex<ProgressManager<S>>>;

/// One row of the "development" table of a module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevelopmentRow {
    pub tema: String,
    pub actividades: String,
    pub duracion: String,
    pub tecnicas: String,
}

/// Typed view of a stored module record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleRecord {
    #[serde(rename = "formData")]
    pub form_data: Map<String, Value>,
    #[serde(rename = "objetivosParticulares")]
    pub objectives: Vec<String>,
    #[serde(rename = "desarrollo")]
    pub development: Vec<DevelopmentRow>,
    /// Completion estimate, 0-100
    #[serde(rename = "avance")]
    pub progress: u32,
    /// Also set by the legacy `completado` key, see [`ModuleRecord::from_value`]
    pub completed: bool,
    #[serde(rename = "lastUpdate", skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

impl ModuleRecord {
    /// Read a stored record; malformed records read as empty
    ///
    /// Older documents flag completion as `completado`. Either key being
    /// true marks the module completed.
    pub fn from_value(key: &str, value: &Value) -> Self {
        let legacy_completed = value
            .get(LEGACY_COMPLETED)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        match serde_json::from_value::<Self>(value.clone()) {
            Ok(mut record) => {
                record.completed |= legacy_completed;
                record
            }
            Err(e) => {
                tracing::warn!(module = %key, error = %e, "Ignoring malformed module record");
                Self::default()
            }
        }
    }

    /// Whether the learner has started filling in the module
    pub fn has_data(&self) -> bool {
        !self.form_data.is_empty() || self.progress > 0 || !self.objectives.is_empty()
    }
}

/// Merge `patch` into `target`, recursing into objects and replacing
/// everything else
pub fn deep_merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

/// Single source of truth for locally persisted progress
pub struct ProgressManager<S> {
    store: S,
    data: Map<String, Value>,
}

impl<S: KeyValueStore> ProgressManager<S> {
    /// Load the document from the store
    ///
    /// Missing, unreadable, or non-object documents load as empty.
    pub fn load(store: S) -> Self {
        let data = match store.get(DATA_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    tracing::warn!("Stored progress is not an object, starting empty");
                    Map::new()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Stored progress is not valid JSON, starting empty");
                    Map::new()
                }
            },
            Ok(None) => Map::new(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stored progress");
                Map::new()
            }
        };

        tracing::debug!("Progress data loaded");
        Self { store, data }
    }

    /// Wrap in the shared handle forms use for auto-save
    pub fn into_shared(self) -> SharedProgress<S> {
        Arc::new(Mutex::new(self))
    }

    fn persist(&self) -> Result<()> {
        let raw = serde_json::to_string(&self.data)?;
        self.store.set(DATA_KEY, &raw)
    }

    /// A copy of the whole document
    pub fn get_data(&self) -> Value {
        Value::Object(self.data.clone())
    }

    /// Replace the whole document
    pub fn save_data(&mut self, data: Value) -> Result<()> {
        self.data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(Error::InvalidData("project data must be an object".to_string())),
        };
        self.persist()
    }

    /// Drop all progress, in memory and in the store
    pub fn clear_data(&mut self) -> Result<()> {
        self.data.clear();
        self.store.remove(DATA_KEY)?;
        tracing::info!("Progress data cleared");
        Ok(())
    }

    fn section_mut(&mut self, name: &str) -> &mut Map<String, Value> {
        let entry = self
            .data
            .entry(name.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry {
            Value::Object(map) => map,
            _ => unreachable!("section was just replaced with an object"),
        }
    }

    fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.data.get(name).and_then(Value::as_object)
    }

    /// Deep-merge `patch` into a module's record and stamp `lastUpdate`
    pub fn set_module_data(&mut self, module_key: &str, patch: Value) -> Result<()> {
        if !patch.is_object() {
            return Err(Error::InvalidData(format!(
                "patch for module {module_key} must be an object"
            )));
        }

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let modules = self.section_mut(MODULES);
        let record = modules
            .entry(module_key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !record.is_object() {
            *record = Value::Object(Map::new());
        }
        deep_merge(record, patch);
        if let Value::Object(record) = record {
            record.insert(LAST_UPDATE.to_string(), Value::String(now));
        }

        self.persist()
    }

    /// A copy of one module's raw record
    pub fn get_module_data(&self, module_key: &str) -> Option<Value> {
        self.section(MODULES)
            .and_then(|modules| modules.get(module_key))
            .cloned()
    }

    /// Typed view of one module's record
    pub fn module_record(&self, module_key: &str) -> Option<ModuleRecord> {
        self.section(MODULES)
            .and_then(|modules| modules.get(module_key))
            .map(|value| ModuleRecord::from_value(module_key, value))
    }

    /// Typed view of every module record
    pub fn modules(&self) -> BTreeMap<String, ModuleRecord> {
        self.section(MODULES)
            .map(|modules| {
                modules
                    .iter()
                    .map(|(key, value)| (key.clone(), ModuleRecord::from_value(key, value)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Store a product under the legacy `productos` section
    pub fn save_product(&mut self, name: &str, data: Value) -> Result<()> {
        self.section_mut(PRODUCTS).insert(name.to_string(), data);
        self.persist()
    }

    /// Load a product from the legacy `productos` section
    pub fn load_product(&self, name: &str) -> Option<Value> {
        self.section(PRODUCTS)
            .and_then(|products| products.get(name))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::store::MemoryStore;
    use serde_json::json;

    fn manager() -> (ProgressManager<Arc<MemoryStore>>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (ProgressManager::load(store.clone()), store)
    }

    #[test]
    fn test_set_module_data_deep_merges() {
        let (mut manager, _) = manager();

        manager
            .set_module_data("carta_descriptiva", json!({ "formData": { "og-accion": "diseñar" } }))
            .unwrap();
        manager
            .set_module_data(
                "carta_descriptiva",
                json!({ "formData": { "og-criterio": "sin errores" }, "avance": 40 }),
            )
            .unwrap();

        let stored = manager.get_module_data("carta_descriptiva").unwrap();
        assert_eq!(stored["formData"]["og-accion"], "diseñar");
        assert_eq!(stored["formData"]["og-criterio"], "sin errores");
        assert_eq!(stored["avance"], 40);
        assert!(stored[LAST_UPDATE].is_string());
    }

    #[test]
    fn test_arrays_are_replaced_not_merged() {
        let (mut manager, _) = manager();
        manager
            .set_module_data("m", json!({ "objetivosParticulares": ["a", "b"] }))
            .unwrap();
        manager
            .set_module_data("m", json!({ "objetivosParticulares": ["c"] }))
            .unwrap();

        let record = manager.module_record("m").unwrap();
        assert_eq!(record.objectives, vec!["c".to_string()]);
    }

    #[test]
    fn test_non_object_patch_rejected() {
        let (mut manager, _) = manager();
        assert!(manager.set_module_data("m", json!("oops")).is_err());
        assert!(manager.get_module_data("m").is_none());
    }

    #[test]
    fn test_reload_from_store() {
        let (mut manager, store) = manager();
        manager
            .set_module_data("logistica", json!({ "completed": true }))
            .unwrap();

        let reloaded = ProgressManager::load(store);
        assert!(reloaded.module_record("logistica").unwrap().completed);
    }

    #[test]
    fn test_corrupt_document_loads_empty() {
        let store = MemoryStore::new();
        store.set(DATA_KEY, "{not json").unwrap();
        let manager = ProgressManager::load(store);
        assert_eq!(manager.get_data(), json!({}));

        let store = MemoryStore::new();
        store.set(DATA_KEY, "[1,2,3]").unwrap();
        let manager = ProgressManager::load(store);
        assert_eq!(manager.get_data(), json!({}));
    }

    #[test]
    fn test_legacy_completado_flag() {
        let (mut manager, _) = manager();
        manager
            .save_data(json!({ "modulos": { "carta_descriptiva": { "completado": true } } }))
            .unwrap();
        assert!(manager.module_record("carta_descriptiva").unwrap().completed);
    }

    #[test]
    fn test_legacy_record_survives_completed_key() {
        let (mut manager, _) = manager();
        manager
            .save_data(json!({
                "modulos": {
                    "carta_descriptiva": {
                        "completado": true,
                        "formData": { "og-accion": "x" },
                        "objetivosParticulares": ["uno"]
                    }
                }
            }))
            .unwrap();
        manager
            .set_module_data("carta_descriptiva", json!({ "completed": true }))
            .unwrap();

        let record = manager.module_record("carta_descriptiva").unwrap();
        assert!(record.completed);
        assert_eq!(record.form_data["og-accion"], "x");
        assert_eq!(record.objectives, vec!["uno".to_string()]);
    }

    #[test]
    fn test_legacy_false_keeps_completed() {
        let (mut manager, _) = manager();
        manager
            .save_data(json!({
                "modulos": { "m": { "completado": false, "completed": true } }
            }))
            .unwrap();
        assert!(manager.module_record("m").unwrap().completed);
    }

    #[test]
    fn test_products_and_clear() {
        let (mut manager, store) = manager();
        manager
            .save_product("carta", json!({ "titulo": "Curso" }))
            .unwrap();
        assert_eq!(manager.load_product("carta").unwrap()["titulo"], "Curso");
        assert!(manager.load_product("missing").is_none());

        manager.clear_data().unwrap();
        assert_eq!(manager.get_data(), json!({}));
        assert!(store.get(DATA_KEY).unwrap().is_none());
    }

    #[test]
    fn test_has_data() {
        assert!(!ModuleRecord::default().has_data());

        let with_progress = ModuleRecord {
            progress: 10,
            ..Default::default()
        };
        assert!(with_progress.has_data());
    }
}

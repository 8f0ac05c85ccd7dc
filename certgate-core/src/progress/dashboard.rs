//! Sequential module unlock
//!
//! The first module is always open; every later module opens only once all
//! modules before it are completed.

use std::collections::BTreeMap;

use serde::Serialize;

use super::manager::{ModuleRecord, ProgressManager};
use super::store::KeyValueStore;

/// Module keys in course order
pub const DEFAULT_MODULE_ORDER: [&str; 6] = [
    "carta_descriptiva",
    "logistica",
    "evaluaciones",
    "manuales",
    "respuestas",
    "auditoria",
];

/// Display state of a module, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Locked,
    Completed,
    InProgress,
    Pending,
}

impl ModuleStatus {
    /// Badge text shown on the dashboard
    pub fn label(&self) -> &'static str {
        match self {
            ModuleStatus::Locked => "Bloqueado",
            ModuleStatus::Completed => "Completado",
            ModuleStatus::InProgress => "En progreso",
            ModuleStatus::Pending => "Pendiente",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleState {
    pub key: String,
    pub unlocked: bool,
    pub status: ModuleStatus,
    /// Stored `avance`, 0 when the module has no record
    pub progress: u32,
}

/// Compute unlock state and status for every module in `order`
///
/// Pure: the same snapshot always yields the same states.
pub fn compute_module_states<K: AsRef<str>>(
    order: &[K],
    snapshot: &BTreeMap<String, ModuleRecord>,
) -> Vec<ModuleState> {
    let mut all_previous_completed = true;

    order
        .iter()
        .map(|key| {
            let key = key.as_ref();
            let record = snapshot.get(key);
            let completed = record.is_some_and(|r| r.completed);
            let unlocked = all_previous_completed;

            let status = if !unlocked {
                ModuleStatus::Locked
            } else if completed {
                ModuleStatus::Completed
            } else if record.is_some_and(ModuleRecord::has_data) {
                ModuleStatus::InProgress
            } else {
                ModuleStatus::Pending
            };

            all_previous_completed &= completed;

            ModuleState {
                key: key.to_string(),
                unlocked,
                status,
                progress: record.map(|r| r.progress).unwrap_or(0),
            }
        })
        .collect()
}

/// Dashboard view over the progress manager
#[derive(Debug, Clone)]
pub struct Dashboard {
    order: Vec<String>,
    states: Vec<ModuleState>,
}

impl Dashboard {
    pub fn new<I, K>(order: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let order: Vec<String> = order.into_iter().map(Into::into).collect();
        let states = compute_module_states(&order, &BTreeMap::new());
        Self { order, states }
    }

    pub fn with_default_order() -> Self {
        Self::new(DEFAULT_MODULE_ORDER)
    }

    /// Recompute from the manager's current snapshot
    pub fn refresh<S: KeyValueStore>(&mut self, manager: &ProgressManager<S>) -> &[ModuleState] {
        self.states = compute_module_states(&self.order, &manager.modules());
        tracing::debug!(
            unlocked = self.states.iter().filter(|s| s.unlocked).count(),
            "Dashboard refreshed"
        );
        &self.states
    }

    pub fn states(&self) -> &[ModuleState] {
        &self.states
    }

    pub fn state(&self, key: &str) -> Option<&ModuleState> {
        self.states.iter().find(|s| s.key == key)
    }

    pub fn is_unlocked(&self, key: &str) -> bool {
        self.state(key).is_some_and(|s| s.unlocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::store::MemoryStore;
    use serde_json::json;

    fn completed() -> ModuleRecord {
        ModuleRecord {
            completed: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_snapshot_only_first_unlocked() {
        let states = compute_module_states(&DEFAULT_MODULE_ORDER, &BTreeMap::new());
        assert_eq!(states.len(), 6);
        assert!(states[0].unlocked);
        assert_eq!(states[0].status, ModuleStatus::Pending);
        for state in &states[1..] {
            assert!(!state.unlocked);
            assert_eq!(state.status, ModuleStatus::Locked);
        }
    }

    #[test]
    fn test_gap_keeps_later_modules_locked() {
        let mut snapshot = BTreeMap::new();
        snapshot.insert("carta_descriptiva".to_string(), completed());
        // Completed out of order: must not unlock anything after the gap
        snapshot.insert("evaluaciones".to_string(), completed());

        let states = compute_module_states(&DEFAULT_MODULE_ORDER, &snapshot);
        assert_eq!(states[0].status, ModuleStatus::Completed);
        assert!(states[1].unlocked);
        assert_eq!(states[1].status, ModuleStatus::Pending);
        assert!(!states[2].unlocked);
        assert_eq!(states[2].status, ModuleStatus::Locked);
        assert!(!states[3].unlocked);
    }

    #[test]
    fn test_in_progress_detection() {
        let mut snapshot = BTreeMap::new();
        snapshot.insert(
            "carta_descriptiva".to_string(),
            ModuleRecord {
                objectives: vec!["Identificar".to_string()],
                ..Default::default()
            },
        );
        let states = compute_module_states(&["carta_descriptiva"], &snapshot);
        assert_eq!(states[0].status, ModuleStatus::InProgress);
    }

    #[test]
    fn test_refresh_reads_manager() {
        let mut manager = ProgressManager::load(MemoryStore::new());
        let mut dashboard = Dashboard::with_default_order();
        assert!(!dashboard.is_unlocked("logistica"));

        manager
            .set_module_data("carta_descriptiva", json!({ "completed": true, "avance": 100 }))
            .unwrap();
        manager
            .set_module_data("logistica", json!({ "avance": 20 }))
            .unwrap();
        dashboard.refresh(&manager);

        assert!(dashboard.is_unlocked("logistica"));
        let logistica = dashboard.state("logistica").unwrap();
        assert_eq!(logistica.status, ModuleStatus::InProgress);
        assert_eq!(logistica.progress, 20);
        assert!(!dashboard.is_unlocked("evaluaciones"));
        assert!(!dashboard.is_unlocked("unknown"));
    }

    #[test]
    fn test_labels() {
        assert_eq!(ModuleStatus::Locked.label(), "Bloqueado");
        assert_eq!(ModuleStatus::InProgress.label(), "En progreso");
    }
}

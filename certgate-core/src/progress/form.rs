//! Schema-driven module forms with debounced auto-save
//!
//! A form is an ordered list of typed fields plus two lists: free-text
//! objectives and development rows. Field edits schedule a debounced save of
//! the whole form; adding or removing list items saves immediately.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::debounce::Debouncer;
use super::manager::{DevelopmentRow, SharedProgress};
use super::store::KeyValueStore;
use crate::error::Error;
use crate::Result;

/// Debounce window for auto-save
pub const AUTOSAVE_DELAY: Duration = Duration::from_millis(400);

/// Module key of the descriptive card
pub const CARTA_MODULE_KEY: &str = "carta_descriptiva";

const DEFAULT_SUBJECT: &str = "Al finalizar el curso, el participante";

const PERCENTAGE_FIELDS: [&str; 4] = [
    "porc-diagnostica",
    "porc-formativa",
    "porc-sumativa",
    "porc-satisfaccion",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    TextArea,
    Number,
    Checkbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Counts toward the progress estimate
    pub tracked: bool,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind, tracked: bool) -> Self {
        Self {
            name,
            kind,
            tracked,
        }
    }
}

/// Fields of the descriptive card, in display order
pub const CARTA_DESCRIPTIVA_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("nombre-curso", FieldKind::Text, false),
    FieldSpec::new("perfil-participante", FieldKind::TextArea, false),
    FieldSpec::new("duracion-total", FieldKind::Number, false),
    FieldSpec::new("og-sujeto", FieldKind::Text, false),
    FieldSpec::new("og-accion", FieldKind::TextArea, true),
    FieldSpec::new("og-condicion", FieldKind::TextArea, true),
    FieldSpec::new("og-criterio", FieldKind::TextArea, true),
    FieldSpec::new("porc-diagnostica", FieldKind::Number, true),
    FieldSpec::new("porc-formativa", FieldKind::Number, true),
    FieldSpec::new("porc-sumativa", FieldKind::Number, true),
    FieldSpec::new("porc-satisfaccion", FieldKind::Number, true),
    FieldSpec::new("requiere-constancia", FieldKind::Checkbox, false),
];

/// A value entered into a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Flag(bool),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Flag(value)
    }
}

/// A problem found by [`FormModule::validate`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationIssue {
    #[error("Debes definir la acción/comportamiento observable.")]
    MissingAction,

    #[error("La suma de los porcentajes de evaluación debe ser exactamente 100% (actual: {total}%).")]
    PercentagesDoNotSum { total: f64 },

    #[error("Agrega al menos un objetivo particular.")]
    NoObjectives,
}

/// Whether a stored form value counts as filled in
fn is_filled(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(_)) => true,
        _ => false,
    }
}

fn as_number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn text_of(form_data: &Map<String, Value>, name: &str) -> String {
    form_data
        .get(name)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Completion estimate in percent
///
/// One point per filled tracked field, one if any objective exists, one if
/// any development row exists.
pub fn compute_progress(
    schema: &[FieldSpec],
    form_data: &Map<String, Value>,
    objectives: &[String],
    development: &[DevelopmentRow],
) -> u32 {
    let tracked: Vec<&FieldSpec> = schema.iter().filter(|f| f.tracked).collect();
    let total = tracked.len() + 2;
    let filled = tracked
        .iter()
        .filter(|f| is_filled(form_data.get(f.name)))
        .count()
        + usize::from(!objectives.is_empty())
        + usize::from(!development.is_empty());

    (100.0 * filled as f64 / total as f64).round() as u32
}

/// A module form bound to the shared progress manager
pub struct FormModule<S: KeyValueStore + 'static> {
    module_key: String,
    schema: &'static [FieldSpec],
    progress: SharedProgress<S>,
    form_data: Map<String, Value>,
    objectives: Vec<String>,
    development: Vec<DevelopmentRow>,
    autosave: Debouncer,
}

impl<S: KeyValueStore + 'static> FormModule<S> {
    /// Open a form, restoring whatever the manager has stored for it
    pub fn open(
        module_key: &str,
        schema: &'static [FieldSpec],
        progress: SharedProgress<S>,
    ) -> Result<Self> {
        let record = {
            let manager = progress
                .lock()
                .map_err(|_| Error::Storage("progress lock poisoned".to_string()))?;
            manager.module_record(module_key).unwrap_or_default()
        };

        Ok(Self {
            module_key: module_key.to_string(),
            schema,
            progress,
            form_data: record.form_data,
            objectives: record.objectives,
            development: record.development,
            autosave: Debouncer::new(AUTOSAVE_DELAY),
        })
    }

    /// Open the descriptive card form
    pub fn carta_descriptiva(progress: SharedProgress<S>) -> Result<Self> {
        Self::open(CARTA_MODULE_KEY, CARTA_DESCRIPTIVA_FIELDS, progress)
    }

    pub fn module_key(&self) -> &str {
        &self.module_key
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.form_data.get(name)
    }

    pub fn objectives(&self) -> &[String] {
        &self.objectives
    }

    pub fn development_rows(&self) -> &[DevelopmentRow] {
        &self.development
    }

    pub fn has_pending_save(&self) -> bool {
        self.autosave.is_pending()
    }

    fn field_spec(&self, name: &str) -> Result<&FieldSpec> {
        self.schema
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| Error::UnknownField(name.to_string()))
    }

    /// Set a field value and schedule an auto-save
    pub fn set_field(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<()> {
        let field = *self.field_spec(name)?;
        let stored = match (field.kind, value.into()) {
            (FieldKind::Checkbox, FieldValue::Flag(flag)) => Value::Bool(flag),
            (FieldKind::Number, FieldValue::Text(text)) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() && trimmed.parse::<f64>().is_err() {
                    return Err(Error::InvalidData(format!("{name} must be a number")));
                }
                Value::String(text)
            }
            (FieldKind::Text | FieldKind::TextArea, FieldValue::Text(text)) => Value::String(text),
            (kind, _) => {
                return Err(Error::InvalidData(format!(
                    "{name} does not accept that value ({kind:?} field)"
                )))
            }
        };

        self.form_data.insert(name.to_string(), stored);
        self.schedule_save();
        Ok(())
    }

    pub fn add_objective(&mut self) -> Result<()> {
        self.objectives.push(String::new());
        self.save_now()
    }

    pub fn set_objective(&mut self, index: usize, text: &str) -> Result<()> {
        let len = self.objectives.len();
        let slot = self
            .objectives
            .get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, len })?;
        *slot = text.to_string();
        self.schedule_save();
        Ok(())
    }

    pub fn remove_objective(&mut self, index: usize) -> Result<()> {
        if index >= self.objectives.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.objectives.len(),
            });
        }
        self.objectives.remove(index);
        self.save_now()
    }

    pub fn add_development_row(&mut self) -> Result<()> {
        self.development.push(DevelopmentRow::default());
        self.save_now()
    }

    /// Edit one cell of a development row (`tema`, `actividades`,
    /// `duracion` or `tecnicas`)
    pub fn set_development_field(&mut self, index: usize, field: &str, value: &str) -> Result<()> {
        let len = self.development.len();
        let row = self
            .development
            .get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, len })?;
        let cell = match field {
            "tema" => &mut row.tema,
            "actividades" => &mut row.actividades,
            "duracion" => &mut row.duracion,
            "tecnicas" => &mut row.tecnicas,
            other => return Err(Error::UnknownField(other.to_string())),
        };
        *cell = value.to_string();
        self.schedule_save();
        Ok(())
    }

    pub fn remove_development_row(&mut self, index: usize) -> Result<()> {
        if index >= self.development.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.development.len(),
            });
        }
        self.development.remove(index);
        self.save_now()
    }

    /// Current completion estimate
    pub fn progress(&self) -> u32 {
        compute_progress(self.schema, &self.form_data, &self.objectives, &self.development)
    }

    /// Running sum of the four evaluation percentages
    pub fn percentage_total(&self) -> f64 {
        PERCENTAGE_FIELDS
            .iter()
            .map(|name| as_number(self.form_data.get(*name)))
            .sum()
    }

    /// The general objective as one sentence, once an action is entered
    pub fn general_objective_preview(&self) -> Option<String> {
        let action = text_of(&self.form_data, "og-accion");
        if action.is_empty() {
            return None;
        }

        let subject = text_of(&self.form_data, "og-sujeto");
        let mut text = if subject.is_empty() {
            DEFAULT_SUBJECT.to_string()
        } else {
            subject
        };
        for part in [
            action,
            text_of(&self.form_data, "og-condicion"),
            text_of(&self.form_data, "og-criterio"),
        ] {
            if !part.is_empty() {
                text.push(' ');
                text.push_str(&part);
            }
        }
        Some(text)
    }

    fn payload(&self) -> Value {
        json!({
            "formData": self.form_data,
            "objetivosParticulares": self.objectives,
            "desarrollo": self.development,
            "avance": self.progress(),
        })
    }

    fn schedule_save(&mut self) {
        let progress = self.progress.clone();
        let module_key = self.module_key.clone();
        let payload = self.payload();

        self.autosave.schedule(move || {
            let result = progress
                .lock()
                .map_err(|_| Error::Storage("progress lock poisoned".to_string()))
                .and_then(|mut manager| manager.set_module_data(&module_key, payload));
            match result {
                Ok(()) => tracing::debug!(module = %module_key, "Auto-saved"),
                Err(e) => tracing::warn!(module = %module_key, error = %e, "Auto-save failed"),
            }
        });
    }

    /// Persist immediately, replacing any pending auto-save
    pub fn save_now(&mut self) -> Result<()> {
        self.autosave.cancel();
        let payload = self.payload();
        let mut manager = self
            .progress
            .lock()
            .map_err(|_| Error::Storage("progress lock poisoned".to_string()))?;
        manager.set_module_data(&self.module_key, payload)
    }

    /// Persist a pending auto-save now, if there is one
    pub fn flush(&mut self) -> Result<()> {
        if self.autosave.is_pending() {
            self.save_now()?;
        }
        Ok(())
    }

    /// Save and mark the module completed
    ///
    /// Does not run [`validate`](Self::validate); completion is the
    /// learner's call.
    pub fn mark_complete(&mut self) -> Result<()> {
        self.save_now()?;
        let mut manager = self
            .progress
            .lock()
            .map_err(|_| Error::Storage("progress lock poisoned".to_string()))?;
        manager.set_module_data(&self.module_key, json!({ "completed": true }))?;
        tracing::info!(module = %self.module_key, "Module marked complete");
        Ok(())
    }

    /// Check the form, reporting every problem at once
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationIssue>> {
        let mut issues = Vec::new();

        if text_of(&self.form_data, "og-accion").is_empty() {
            issues.push(ValidationIssue::MissingAction);
        }
        let total = self.percentage_total();
        if total != 100.0 {
            issues.push(ValidationIssue::PercentagesDoNotSum { total });
        }
        if self.objectives.is_empty() {
            issues.push(ValidationIssue::NoObjectives);
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

impl<S: KeyValueStore + 'static> Drop for FormModule<S> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(module = %self.module_key, error = %e, "Failed to flush form on close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::manager::ProgressManager;
    use crate::progress::store::MemoryStore;
    use std::sync::Arc;

    fn shared() -> SharedProgress<Arc<MemoryStore>> {
        ProgressManager::load(Arc::new(MemoryStore::new())).into_shared()
    }

    fn stored_avance(progress: &SharedProgress<Arc<MemoryStore>>) -> Option<u64> {
        progress
            .lock()
            .unwrap()
            .get_module_data(CARTA_MODULE_KEY)
            .and_then(|v| v["avance"].as_u64())
    }

    fn fill_percentages(form: &mut FormModule<Arc<MemoryStore>>, values: [&str; 4]) {
        for (name, value) in PERCENTAGE_FIELDS.iter().zip(values) {
            form.set_field(name, value).unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_field_edits_are_debounced() {
        let progress = shared();
        let mut form = FormModule::carta_descriptiva(progress.clone()).unwrap();

        form.set_field("og-accion", "diseñar").unwrap();
        form.set_field("og-condicion", "con base en el estándar").unwrap();
        assert!(form.has_pending_save());
        assert!(stored_avance(&progress).is_none());

        tokio::time::sleep(AUTOSAVE_DELAY + Duration::from_millis(10)).await;
        tokio::task::yield_now().await;

        let stored = progress
            .lock()
            .unwrap()
            .get_module_data(CARTA_MODULE_KEY)
            .unwrap();
        assert_eq!(stored["formData"]["og-accion"], "diseñar");
        assert_eq!(stored["formData"]["og-condicion"], "con base en el estándar");
        // 2 of 7 tracked fields, no lists: 2/9
        assert_eq!(stored["avance"], 22);
    }

    #[tokio::test(start_paused = true)]
    async fn test_structural_changes_save_immediately() {
        let progress = shared();
        let mut form = FormModule::carta_descriptiva(progress.clone()).unwrap();

        form.add_objective().unwrap();
        assert!(!form.has_pending_save());
        assert_eq!(stored_avance(&progress), Some(11));

        form.set_objective(0, "Identificar riesgos").unwrap();
        assert!(form.has_pending_save());
        form.add_development_row().unwrap();
        // Immediate save replaces the pending one and includes the edit
        assert!(!form.has_pending_save());

        let record = progress
            .lock()
            .unwrap()
            .module_record(CARTA_MODULE_KEY)
            .unwrap();
        assert_eq!(record.objectives, vec!["Identificar riesgos".to_string()]);
        assert_eq!(record.development.len(), 1);
        assert_eq!(record.progress, 22);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopen_restores_state() {
        let progress = shared();
        {
            let mut form = FormModule::carta_descriptiva(progress.clone()).unwrap();
            form.set_field("og-sujeto", "El participante").unwrap();
            form.add_development_row().unwrap();
            form.set_development_field(0, "tema", "Introducción").unwrap();
            // Dropping flushes the pending edit
        }

        let form = FormModule::carta_descriptiva(progress).unwrap();
        assert_eq!(form.field("og-sujeto").unwrap(), "El participante");
        assert_eq!(form.development_rows()[0].tema, "Introducción");
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_full() {
        let mut form = FormModule::carta_descriptiva(shared()).unwrap();
        form.set_field("og-accion", "a").unwrap();
        form.set_field("og-condicion", "b").unwrap();
        form.set_field("og-criterio", "c").unwrap();
        fill_percentages(&mut form, ["10", "20", "60", "10"]);
        form.add_objective().unwrap();
        form.add_development_row().unwrap();

        assert_eq!(form.progress(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validate_reports_everything() {
        let mut form = FormModule::carta_descriptiva(shared()).unwrap();
        fill_percentages(&mut form, ["10", "20", "60", "9"]);

        let issues = form.validate().unwrap_err();
        assert_eq!(
            issues,
            vec![
                ValidationIssue::MissingAction,
                ValidationIssue::PercentagesDoNotSum { total: 99.0 },
                ValidationIssue::NoObjectives,
            ]
        );
        assert!(issues[1].to_string().contains("exactamente 100%"));

        form.set_field("porc-satisfaccion", "11").unwrap();
        assert_eq!(form.percentage_total(), 101.0);
        assert!(form.validate().is_err());

        form.set_field("porc-satisfaccion", "10").unwrap();
        form.set_field("og-accion", "elaborar").unwrap();
        form.add_objective().unwrap();
        assert_eq!(form.validate(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_complete_ignores_validation() {
        let progress = shared();
        let mut form = FormModule::carta_descriptiva(progress.clone()).unwrap();
        assert!(form.validate().is_err());

        form.mark_complete().unwrap();
        let record = progress
            .lock()
            .unwrap()
            .module_record(CARTA_MODULE_KEY)
            .unwrap();
        assert!(record.completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_field_errors() {
        let mut form = FormModule::carta_descriptiva(shared()).unwrap();

        assert!(matches!(
            form.set_field("no-such-field", "x"),
            Err(Error::UnknownField(_))
        ));
        assert!(matches!(
            form.set_field("porc-sumativa", "mucho"),
            Err(Error::InvalidData(_))
        ));
        assert!(matches!(
            form.set_field("og-accion", true),
            Err(Error::InvalidData(_))
        ));
        assert!(matches!(
            form.set_objective(3, "x"),
            Err(Error::IndexOutOfRange { index: 3, len: 0 })
        ));
        assert!(matches!(
            form.remove_development_row(0),
            Err(Error::IndexOutOfRange { .. })
        ));

        form.set_field("requiere-constancia", true).unwrap();
        assert_eq!(form.field("requiere-constancia"), Some(&Value::Bool(true)));
        form.set_field("porc-sumativa", "").unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_general_objective_preview() {
        let mut form = FormModule::carta_descriptiva(shared()).unwrap();
        assert_eq!(form.general_objective_preview(), None);

        form.set_field("og-accion", "elaborará una carta descriptiva").unwrap();
        form.set_field("og-criterio", "sin omisiones").unwrap();
        assert_eq!(
            form.general_objective_preview().as_deref(),
            Some("Al finalizar el curso, el participante elaborará una carta descriptiva sin omisiones")
        );
    }
}

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Deserializes `null` the same as a missing key.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts codes sent as strings or numbers; blanks become `None`.
pub(crate) fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(text_of(&Value::deserialize(deserializer)?))
}

pub(crate) fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Unwraps the `{ "value": x }` envelope the portal uses for validation attributes.
pub(crate) fn unwrap_value(value: &Value) -> &Value {
    match value {
        Value::Object(map) => map.get("value").unwrap_or(&Value::Null),
        other => other,
    }
}

/// Reads a number from a JSON number or numeric string.
pub(crate) fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub(crate) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => matches!(text.trim(), "1" | "true" | "True"),
        _ => false,
    }
}

/// Step (or sub-form) schema as returned under `data.detail`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StepDetail {
    #[serde(deserialize_with = "lenient_text")]
    pub code: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub forms: Vec<FormSchema>,
    #[serde(deserialize_with = "null_as_default")]
    pub panels: Vec<PanelSchema>,
    #[serde(deserialize_with = "null_as_default")]
    pub lists: Vec<ListEntry>,
}

impl StepDetail {
    /// Reads `data.detail` from a step or sub-form response; malformed shapes count as empty.
    pub fn from_response(response: &Value) -> Self {
        response
            .get("data")
            .and_then(|data| data.get("detail"))
            .filter(|detail| detail.is_object())
            .and_then(|detail| serde_json::from_value(detail.clone()).ok())
            .unwrap_or_default()
    }

    pub fn is_form(&self) -> bool {
        !self.forms.is_empty() || !self.panels.is_empty()
    }

    pub fn list_codes(&self) -> Vec<String> {
        self.lists.iter().filter_map(|list| list.code.clone()).collect()
    }

    /// Fields in document order: form, panel, field group, field. Top-level panels are
    /// only read when the detail carries no forms.
    pub fn fields(&self) -> Vec<&FieldSchema> {
        let panels: Vec<&PanelSchema> = if self.forms.is_empty() {
            self.panels.iter().collect()
        } else {
            self.forms.iter().flat_map(|form| form.panels.iter()).collect()
        };
        panels
            .into_iter()
            .flat_map(|panel| panel.field_groups.iter())
            .flat_map(|group| group.fields.iter())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FormSchema {
    #[serde(deserialize_with = "lenient_text")]
    pub code: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub panels: Vec<PanelSchema>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PanelSchema {
    #[serde(deserialize_with = "lenient_text")]
    pub code: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub field_groups: Vec<FieldGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FieldGroup {
    #[serde(deserialize_with = "null_as_default")]
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListEntry {
    #[serde(deserialize_with = "lenient_text")]
    pub code: Option<String>,
}

/// One dynamic field. Loosely typed attributes stay as JSON and are read through accessors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FieldSchema {
    #[serde(deserialize_with = "lenient_text")]
    pub code: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub field_type: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub field_type_code: Option<String>,
    pub data_type: Value,
    #[serde(deserialize_with = "lenient_text")]
    pub option_code: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub dependency_option_field_code: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub value_list: Vec<Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub validation: Map<String, Value>,
    pub is_permanent_disable: Value,
    pub value: Value,
    #[serde(deserialize_with = "null_as_default")]
    pub key_calculates: Vec<CalculationStep>,
}

impl FieldSchema {
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Lowercased field type, preferring `field_type_code` when both are present.
    pub fn field_type(&self) -> String {
        self.field_type_code
            .as_deref()
            .or(self.field_type.as_deref())
            .unwrap_or_default()
            .to_lowercase()
    }

    /// Lowercased logical type; `validation.data_type` wins over the field-level attribute.
    pub fn data_type(&self) -> String {
        let from_validation = self.validation.get("data_type").map(unwrap_value);
        let from_field = unwrap_value(&self.data_type);
        from_validation
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
            .or_else(|| from_field.as_str())
            .unwrap_or_default()
            .trim()
            .to_lowercase()
    }

    pub fn validation_value(&self, key: &str) -> &Value {
        self.validation
            .get(key)
            .map(unwrap_value)
            .unwrap_or(&Value::Null)
    }

    pub fn is_read_only(&self) -> bool {
        is_truthy(&self.is_permanent_disable) && !is_blank(&self.value)
    }

    pub fn is_calculated(&self) -> bool {
        !self.key_calculates.is_empty()
    }

    /// Non-null inline option values; object entries contribute their `value`.
    pub fn inline_values(&self) -> Vec<Value> {
        self.value_list
            .iter()
            .map(|entry| match entry {
                Value::Object(map) => map.get("value").cloned().unwrap_or(Value::Null),
                scalar => scalar.clone(),
            })
            .filter(|value| !value.is_null())
            .collect()
    }
}

/// One row of a calculated field's `key_calculates`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CalculationStep {
    pub key_calculate_order: Value,
    #[serde(deserialize_with = "lenient_text")]
    pub calculate_sign: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub field_calculate: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub key_calculate: Option<String>,
    pub base_value: Value,
    #[serde(rename = "BASE_value")]
    pub base_value_upper: Value,
}

impl CalculationStep {
    pub fn order(&self) -> f64 {
        number_of(&self.key_calculate_order).unwrap_or(0.0)
    }

    pub fn literal(&self) -> Option<&Value> {
        [&self.base_value, &self.base_value_upper]
            .into_iter()
            .find(|value| !is_blank(value))
    }
}

/// Entry of the option catalog (`GET /formdata/invt`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct OptionItem {
    #[serde(deserialize_with = "lenient_text")]
    pub code: Option<String>,
    pub value: Value,
    #[serde(deserialize_with = "null_as_default")]
    pub children: Vec<OptionItem>,
}

/// Codes identifying which override tables apply to a build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionScope {
    pub application_id: Option<String>,
    pub step_code: Option<String>,
    pub subform_code: Option<String>,
}

impl ResolutionScope {
    pub fn for_step(application_id: &str, step_code: &str) -> Self {
        Self {
            application_id: Some(application_id.to_string()),
            step_code: Some(step_code.to_string()),
            subform_code: None,
        }
    }

    pub fn for_subform(application_id: &str, step_code: Option<&str>, subform_code: &str) -> Self {
        Self {
            application_id: Some(application_id.to_string()),
            step_code: step_code.map(str::to_string),
            subform_code: Some(subform_code.to_string()),
        }
    }

    /// Sub-form code first, then the enclosing step code.
    pub fn codes(&self) -> Vec<&str> {
        [self.subform_code.as_deref(), self.step_code.as_deref()]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Values resolved so far in one payload build, keyed by field code.
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    values: HashMap<String, Value>,
    scope: ResolutionScope,
}

impl ResolutionContext {
    pub fn new(scope: ResolutionScope) -> Self {
        Self {
            values: HashMap::new(),
            scope,
        }
    }

    pub fn seeded(scope: ResolutionScope, seed: &HashMap<String, Value>) -> Self {
        Self {
            values: seed.clone(),
            scope,
        }
    }

    pub fn scope(&self) -> &ResolutionScope {
        &self.scope
    }

    pub fn get(&self, code: &str) -> Option<&Value> {
        self.values.get(code)
    }

    /// Present and not null or an empty string.
    pub fn has_value(&self, code: &str) -> bool {
        self.values.get(code).is_some_and(|value| !is_blank(value))
    }

    pub fn number(&self, code: &str) -> f64 {
        self.values.get(code).and_then(number_of).unwrap_or(0.0)
    }

    pub fn insert(&mut self, code: impl Into<String>, value: Value) {
        self.values.insert(code.into(), value);
    }
}

/// One entry of a save payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadEntry {
    pub field_code: String,
    pub value: Value,
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn data_type_prefers_validation_and_unwraps() {
        let field: FieldSchema = serde_json::from_value(json!({
            "code": "capital",
            "data_type": "string",
            "validation": {"data_type": {"value": "Float"}, "min": {"value": "3"}}
        }))
        .expect("field parses");

        assert_eq!(field.data_type(), "float");
        assert_eq!(field.validation_value("min"), &json!("3"));
        assert_eq!(field.validation_value("max"), &Value::Null);
    }

    #[test]
    fn null_collections_and_numeric_codes_are_tolerated() {
        let detail: StepDetail = serde_json::from_value(json!({
            "code": 12,
            "forms": null,
            "panels": [{"field_groups": [{"fields": [
                {"code": "a", "field_type_code": "select", "value_list": null},
                {"code": "", "field_type": "text"},
                {"code": "b", "is_permanent_disable": 1, "value": "kept"}
            ]}]}],
            "lists": null
        }))
        .expect("detail parses");

        assert_eq!(detail.code.as_deref(), Some("12"));
        let fields = detail.fields();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].field_type(), "select");
        assert!(fields[1].code().is_none());
        assert!(fields[2].is_read_only());
    }

    #[test]
    fn forms_take_precedence_over_top_level_panels() {
        let detail: StepDetail = serde_json::from_value(json!({
            "forms": [{"panels": [{"field_groups": [{"fields": [{"code": "in_form"}]}]}]}],
            "panels": [{"field_groups": [{"fields": [{"code": "top_level"}]}]}]
        }))
        .expect("detail parses");

        let codes: Vec<_> = detail.fields().iter().filter_map(|f| f.code()).collect();
        assert_eq!(codes, vec!["in_form"]);
    }

    #[test]
    fn inline_values_extract_object_values() {
        let field: FieldSchema = serde_json::from_value(json!({
            "code": "size",
            "value_list": [{"value": "small"}, "large", {"label": "no value"}, null]
        }))
        .expect("field parses");

        assert_eq!(field.inline_values(), vec![json!("small"), json!("large")]);
    }
}

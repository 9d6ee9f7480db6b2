use std::collections::HashMap;

use serde_json::{json, Value};

use super::calculate::evaluate;
use super::domain::{PayloadEntry, ResolutionContext, ResolutionScope, StepDetail};
use super::resolver::ValueResolver;

/// Builds the ordered save payload for a step or sub-form schema.
///
/// Fields are visited in document order and each coded field yields exactly one entry.
/// Calculated fields are evaluated against the values resolved so far, then caller overrides
/// are used verbatim, then the resolver. A repeated code reuses the first value.
pub fn build_payload(
    detail: &StepDetail,
    resolver: &dyn ValueResolver,
    overrides: &HashMap<String, Value>,
    scope: ResolutionScope,
) -> Vec<PayloadEntry> {
    let mut context = ResolutionContext::seeded(scope, overrides);
    let mut resolved: HashMap<String, Value> = HashMap::new();
    let mut entries = Vec::new();

    for field in detail.fields() {
        let Some(code) = field.code() else {
            continue;
        };

        let value = if let Some(first) = resolved.get(code) {
            first.clone()
        } else if field.is_calculated() {
            json!(evaluate(&field.key_calculates, &context))
        } else if let Some(value) = overrides.get(code) {
            value.clone()
        } else {
            resolver.resolve(field, &mut context)
        };

        context.insert(code, value.clone());
        resolved.entry(code.to_string()).or_insert_with(|| value.clone());
        entries.push(PayloadEntry {
            field_code: code.to_string(),
            value,
            comment: None,
        });
    }

    entries
}

/// Wraps payload entries in the `{"data": [...]}` save envelope.
pub fn save_body(entries: &[PayloadEntry]) -> Value {
    json!({ "data": entries })
}

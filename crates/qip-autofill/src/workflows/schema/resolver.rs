use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::calculate::round2;
use super::domain::{number_of, FieldSchema, ResolutionContext, ResolutionScope};
use super::generators;
use super::media::{MediaError, MediaFolder, MediaLibrary};
use super::options::{sample, OptionCatalog};
use super::overrides::{OverrideProvider, OverrideValue, UploadKind};
use crate::api::{ApiError, FileUploader};

const NUMERIC_TYPES: [&str; 5] = ["int", "integer", "float", "decimal", "number"];
const NUMERIC_CEILING: f64 = 100_000.0;
const PAST_DATE_MAX_DAYS: i64 = 2000;
const EMAIL_CONTEXT_KEY: &str = "email";

/// Produces a value for one field, reading and extending the build's context.
pub trait ValueResolver: Send + Sync {
    fn resolve(&self, field: &FieldSchema, context: &mut ResolutionContext) -> Value;
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("list sheet upload needs an application id")]
    MissingApplication,
}

/// Lowercased attributes of the field being resolved.
struct FieldView<'a> {
    field: &'a FieldSchema,
    code: &'a str,
    code_lower: String,
    field_type: String,
    data_type: String,
}

impl<'a> FieldView<'a> {
    fn new(field: &'a FieldSchema) -> Self {
        let code = field.code().unwrap_or_default();
        Self {
            field,
            code,
            code_lower: code.to_lowercase(),
            field_type: field.field_type(),
            data_type: field.data_type(),
        }
    }

    fn code_mentions(&self, needle: &str) -> bool {
        self.code_lower.contains(needle)
    }
}

type Applies = fn(&FieldView<'_>, &ResolutionContext) -> bool;
type Produce =
    fn(&FieldValueResolver, &FieldView<'_>, &mut ResolutionContext, &mut StdRng) -> Option<Value>;

/// One entry of the resolution table. The first applicable rule that produces a value wins.
pub struct ResolutionRule {
    pub name: &'static str,
    applies: Applies,
    produce: Produce,
}

static RESOLUTION_RULES: [ResolutionRule; 16] = [
    ResolutionRule {
        name: "step_override",
        applies: |_, ctx| !ctx.scope().codes().is_empty(),
        produce: step_override,
    },
    ResolutionRule {
        name: "read_only",
        applies: |view, _| view.field.is_read_only(),
        produce: |_, view, _, _| Some(view.field.value.clone()),
    },
    ResolutionRule {
        name: "file_upload",
        applies: |view, _| matches!(view.field_type.as_str(), "attachment" | "image"),
        produce: file_upload,
    },
    ResolutionRule {
        name: "dependent_option",
        applies: |view, ctx| {
            view.field.option_code.is_some()
                && view
                    .field
                    .dependency_option_field_code
                    .as_deref()
                    .is_some_and(|parent| ctx.has_value(parent))
        },
        produce: dependent_option,
    },
    ResolutionRule {
        name: "list_of_string",
        applies: |view, _| view.data_type == "list_of_string",
        produce: list_of_string,
    },
    ResolutionRule {
        name: "multi_select",
        applies: |view, _| view.field_type == "multi_select",
        produce: multi_select,
    },
    ResolutionRule {
        name: "option_pick",
        applies: |view, _| view.field.option_code.is_some(),
        produce: |resolver, view, _, rng| {
            let option_code = view.field.option_code.as_deref()?;
            resolver.catalog.pick_one(option_code, rng)
        },
    },
    ResolutionRule {
        name: "past_date",
        applies: |view, _| view.data_type == "date",
        produce: |_, _, _, rng| Some(json!(generators::past_date(rng, PAST_DATE_MAX_DAYS))),
    },
    ResolutionRule {
        name: "lat_lng",
        applies: |view, _| view.code_mentions("lat_lng"),
        produce: |_, _, _, rng| Some(json!(generators::lat_lng(rng))),
    },
    ResolutionRule {
        name: "passport",
        applies: |view, _| view.code_mentions("passport") || view.code_mentions("citizen_id"),
        produce: |_, _, _, rng| Some(json!(generators::passport_number(rng))),
    },
    ResolutionRule {
        name: "inline_option",
        applies: |view, _| !view.field.value_list.is_empty(),
        produce: |_, view, _, rng| view.field.inline_values().choose(rng).cloned(),
    },
    ResolutionRule {
        name: "email",
        applies: |view, _| view.code_mentions("email"),
        produce: email,
    },
    ResolutionRule {
        name: "phone",
        applies: |view, _| view.code_mentions("phone") && !view.code_mentions("code"),
        produce: |_, _, _, rng| Some(json!(generators::phone_number(rng))),
    },
    ResolutionRule {
        name: "localized_name",
        applies: |view, _| {
            ["_km", "_kh", "_en"]
                .iter()
                .any(|suffix| view.code_lower.ends_with(suffix))
        },
        produce: |_, view, _, rng| {
            if view.code_lower.ends_with("_en") {
                Some(json!(generators::english_name(rng)))
            } else {
                Some(json!(generators::khmer_company_name(rng)))
            }
        },
    },
    ResolutionRule {
        name: "numeric",
        applies: |view, _| NUMERIC_TYPES.contains(&view.data_type.as_str()),
        produce: numeric,
    },
    ResolutionRule {
        name: "default",
        applies: |_, _| true,
        produce: |_, _, _, rng| Some(json!(generators::auto_token(rng))),
    },
];

/// Names of the resolution rules in evaluation order.
pub fn rule_names() -> Vec<&'static str> {
    RESOLUTION_RULES.iter().map(|rule| rule.name).collect()
}

/// Schema-driven resolver: step overrides, uploads, option picks, then typed generation.
pub struct FieldValueResolver {
    catalog: Arc<OptionCatalog>,
    uploader: Arc<dyn FileUploader>,
    media: MediaLibrary,
    overrides: Arc<dyn OverrideProvider>,
    rng: Mutex<StdRng>,
}

impl FieldValueResolver {
    pub fn new(
        catalog: Arc<OptionCatalog>,
        uploader: Arc<dyn FileUploader>,
        media: MediaLibrary,
        overrides: Arc<dyn OverrideProvider>,
    ) -> Self {
        Self {
            catalog,
            uploader,
            media,
            overrides,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Makes every random choice reproducible.
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Resolves a field and reports which rule produced the value.
    pub fn resolve_traced(
        &self,
        field: &FieldSchema,
        context: &mut ResolutionContext,
    ) -> (Value, &'static str) {
        let view = FieldView::new(field);
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        for rule in &RESOLUTION_RULES {
            if !(rule.applies)(&view, context) {
                continue;
            }
            if let Some(value) = (rule.produce)(self, &view, context, &mut *rng) {
                debug!(field = view.code, rule = rule.name, "field resolved");
                return (value, rule.name);
            }
        }
        (json!(generators::auto_token(&mut *rng)), "default")
    }

    /// Uploads a random image from `folder` and returns the new file id.
    pub fn upload_random<R: Rng + ?Sized>(
        &self,
        kind: UploadKind,
        folder: MediaFolder,
        rng: &mut R,
    ) -> Result<Value, UploadError> {
        let path = self.media.random_image(folder, rng)?;
        let file_id = match kind {
            UploadKind::Attachment => self.uploader.upload_attachment(&path)?,
            UploadKind::Image => self.uploader.upload_image(&path)?,
        };
        Ok(Value::String(file_id))
    }

    fn execute(
        &self,
        instruction: OverrideValue,
        scope: &ResolutionScope,
        rng: &mut StdRng,
    ) -> Result<Value, UploadError> {
        match instruction {
            OverrideValue::Value(value) => Ok(value),
            OverrideValue::Upload { kind, folder } => self.upload_random(kind, folder, rng),
            OverrideValue::ListSheet {
                list_code,
                folder,
                file_name,
            } => {
                let application_id = scope
                    .application_id
                    .as_deref()
                    .ok_or(UploadError::MissingApplication)?;
                let path = self.media.find_sample_sheet(folder, file_name)?;
                Ok(self
                    .uploader
                    .upload_list_sheet(application_id, list_code, &path)?)
            }
        }
    }
}

impl ValueResolver for FieldValueResolver {
    fn resolve(&self, field: &FieldSchema, context: &mut ResolutionContext) -> Value {
        self.resolve_traced(field, context).0
    }
}

fn step_override(
    resolver: &FieldValueResolver,
    view: &FieldView<'_>,
    ctx: &mut ResolutionContext,
    rng: &mut StdRng,
) -> Option<Value> {
    let scope_codes: Vec<String> = ctx
        .scope()
        .codes()
        .into_iter()
        .map(str::to_string)
        .collect();

    for scope_code in scope_codes {
        let instruction = match resolver
            .overrides
            .override_for(&scope_code, view.code, ctx, rng)
        {
            Some(OverrideValue::Value(Value::Null)) | None => continue,
            Some(instruction) => instruction,
        };
        let scope = ctx.scope().clone();
        return match resolver.execute(instruction, &scope, rng) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(field = view.code, scope = %scope_code, error = %err, "override failed, using generic rules");
                None
            }
        };
    }
    None
}

fn file_upload(
    resolver: &FieldValueResolver,
    view: &FieldView<'_>,
    _ctx: &mut ResolutionContext,
    rng: &mut StdRng,
) -> Option<Value> {
    let kind = if view.field_type == "image" {
        UploadKind::Image
    } else {
        UploadKind::Attachment
    };
    let folder = if view.code_mentions("profile") || view.code_mentions("face") {
        MediaFolder::FaceScan
    } else {
        MediaFolder::General
    };

    match resolver.upload_random(kind, folder, rng) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(field = view.code, folder = folder.label(), error = %err, "upload failed");
            None
        }
    }
}

fn dependent_option(
    resolver: &FieldValueResolver,
    view: &FieldView<'_>,
    ctx: &mut ResolutionContext,
    rng: &mut StdRng,
) -> Option<Value> {
    let keyword = view.field.option_code.as_deref()?;
    let parent_code = view.field.dependency_option_field_code.as_deref()?;
    let parent = ctx.get(parent_code)?.clone();
    resolver.catalog.pick_dependent(keyword, &parent, rng)
}

fn min_length(field: &FieldSchema) -> usize {
    number_of(field.validation_value("min_length"))
        .filter(|n| n.is_finite() && *n > 0.0)
        .map(|n| n as usize)
        .unwrap_or(1)
}

fn list_of_string(
    resolver: &FieldValueResolver,
    view: &FieldView<'_>,
    _ctx: &mut ResolutionContext,
    rng: &mut StdRng,
) -> Option<Value> {
    if view.code == "investment_target_detail" {
        let children = resolver.catalog.children_of("investment_target", "1");
        let count = children.len().min(3);
        return Some(json!(sample(children, count, rng)));
    }

    let inline = view.field.inline_values();
    if !inline.is_empty() {
        let count = inline.len().min(3);
        return Some(Value::Array(sample(inline, count, rng)));
    }

    if let Some(option_code) = view.field.option_code.as_deref() {
        let picked = resolver
            .catalog
            .pick_many(option_code, min_length(view.field), rng);
        return Some(Value::Array(picked));
    }

    Some(json!([]))
}

fn multi_select(
    resolver: &FieldValueResolver,
    view: &FieldView<'_>,
    _ctx: &mut ResolutionContext,
    rng: &mut StdRng,
) -> Option<Value> {
    if let Some(option_code) = view.field.option_code.as_deref() {
        let picked = resolver
            .catalog
            .pick_many(option_code, min_length(view.field), rng);
        if !picked.is_empty() {
            return Some(Value::Array(picked));
        }
    }
    match view.field.inline_values().choose(rng) {
        Some(value) => Some(json!([value])),
        None => Some(json!([])),
    }
}

fn email(
    _resolver: &FieldValueResolver,
    view: &FieldView<'_>,
    ctx: &mut ResolutionContext,
    rng: &mut StdRng,
) -> Option<Value> {
    let echoes = view.code_mentions("confirm") || view.code_mentions("repeat");
    if echoes && ctx.has_value(EMAIL_CONTEXT_KEY) {
        return ctx.get(EMAIL_CONTEXT_KEY).cloned();
    }
    let address = json!(generators::email_address(rng));
    ctx.insert(EMAIL_CONTEXT_KEY, address.clone());
    Some(address)
}

fn bound(field: &FieldSchema, key: &str) -> Option<f64> {
    number_of(field.validation_value(key)).filter(|n| n.is_finite())
}

fn numeric(
    _resolver: &FieldValueResolver,
    view: &FieldView<'_>,
    _ctx: &mut ResolutionContext,
    rng: &mut StdRng,
) -> Option<Value> {
    let is_float = view.data_type == "float";
    let min = bound(view.field, "min").unwrap_or(0.0);
    let mut max = bound(view.field, "max").unwrap_or(min + 500.0);
    if min > max {
        max = min + 500.0;
    }
    max = max.min(NUMERIC_CEILING);

    if max < min {
        return Some(if is_float {
            json!(round2(min))
        } else {
            json!(min.trunc() as i64)
        });
    }

    if is_float {
        return Some(json!(round2(rng.gen_range(min..=max))));
    }
    let low = min.trunc() as i64;
    let high = (max.trunc() as i64).max(low);
    Some(json!(rng.gen_range(low..=high)))
}

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::applicant::{container_object_id, first_row_id, ApplicantError, ApplicantIdentityResolver};
use crate::api::{data_of, id_text, ApiError, ApiRequest, RemoteApi};
use crate::config::ApiConfig;
use crate::workflows::schema::domain::{number_of, text_of};
use crate::workflows::schema::{build_payload, save_body, ResolutionScope, StepDetail, ValueResolver};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Applicant(#[from] ApplicantError),
    #[error("step list has no `{project_type}` entries")]
    MissingStepList { project_type: String },
    #[error("application creation returned no investment_info.id")]
    MissingApplicationId,
    #[error("sub-form `{subform}` exposes no object id")]
    MissingObjectId { subform: String },
}

/// One entry of the ordered step list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepInfo {
    pub code: String,
    pub step_order: f64,
    pub name: Option<String>,
}

/// How a step's schema is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum StepShape {
    /// Form save, optionally followed by the listed sub-forms.
    Form { subforms: Vec<String> },
    /// Wrapper whose listed sub-forms are each submitted.
    Wrapper { subforms: Vec<String> },
    /// A bare sub-form, named by the step detail or the step code.
    Subform { code: String },
}

impl StepShape {
    /// Classifies a step detail; a detail with neither forms, panels nor lists is a bare sub-form.
    pub fn classify(step_code: &str, detail: &StepDetail) -> Self {
        let subforms = detail.list_codes();
        if detail.is_form() {
            return Self::Form { subforms };
        }
        if !subforms.is_empty() {
            return Self::Wrapper { subforms };
        }
        let code = detail
            .code
            .as_deref()
            .filter(|code| *code != step_code)
            .unwrap_or(step_code)
            .to_string();
        Self::Subform { code }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Form { .. } => "form",
            Self::Wrapper { .. } => "wrapper",
            Self::Subform { .. } => "subform",
        }
    }
}

/// Lists, classifies, and submits application steps.
pub struct StepSubmitter {
    api: Arc<dyn RemoteApi>,
    resolver: Arc<dyn ValueResolver>,
    applicants: Arc<ApplicantIdentityResolver>,
    step_list_url: String,
    project_type: String,
}

impl StepSubmitter {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        resolver: Arc<dyn ValueResolver>,
        applicants: Arc<ApplicantIdentityResolver>,
        config: &ApiConfig,
    ) -> Self {
        Self {
            api,
            resolver,
            applicants,
            step_list_url: config.step_list_url.clone(),
            project_type: config.project_type.clone(),
        }
    }

    pub fn project_type(&self) -> &str {
        &self.project_type
    }

    /// Opens a new application and returns its id.
    pub fn create_application(&self, acting_user: Option<&str>) -> Result<String, StepError> {
        let response = self.api.execute(
            ApiRequest::get("/step/general_info")
                .query("type", &self.project_type)
                .acting_as(acting_user),
        )?;
        let id = data_of(&response)
            .get("investment_info")
            .and_then(|info| info.get("id"))
            .and_then(id_text)
            .ok_or(StepError::MissingApplicationId)?;
        info!(application_id = %id, "application created");
        Ok(id)
    }

    /// Required steps for the project type, sorted by `step_order`.
    pub fn list_steps(&self, acting_user: Option<&str>) -> Result<Vec<StepInfo>, StepError> {
        let response = self
            .api
            .execute(ApiRequest::get(self.step_list_url.as_str()).acting_as(acting_user))?;
        let entries = data_of(&response)
            .get(&self.project_type)
            .and_then(Value::as_array)
            .ok_or_else(|| StepError::MissingStepList {
                project_type: self.project_type.clone(),
            })?;

        let mut steps: Vec<StepInfo> = entries
            .iter()
            .filter_map(|entry| {
                let code = entry.get("code").and_then(text_of)?;
                Some(StepInfo {
                    code,
                    step_order: entry.get("step_order").and_then(number_of).unwrap_or(0.0),
                    name: entry.get("name").and_then(text_of),
                })
            })
            .collect();
        steps.sort_by(|a, b| a.step_order.total_cmp(&b.step_order));
        Ok(steps)
    }

    /// Fetches the step schema; a failed or malformed fetch yields an empty detail.
    pub fn step_detail(&self, application_id: &str, step_code: &str, acting_user: Option<&str>) -> StepDetail {
        let request = ApiRequest::get(format!("/step/{step_code}"))
            .query("invt_id", application_id)
            .query("type", &self.project_type)
            .acting_as(acting_user);
        match self.api.execute(request) {
            Ok(response) => StepDetail::from_response(&response),
            Err(err) => {
                debug!(step = step_code, error = %err, "step detail unavailable, treating as sub-form");
                StepDetail::default()
            }
        }
    }

    /// Submits one step according to its schema shape. Returns `true` once handled.
    pub fn submit_step(
        &self,
        application_id: &str,
        step_code: &str,
        acting_user: Option<&str>,
    ) -> Result<bool, StepError> {
        let detail = self.step_detail(application_id, step_code, acting_user);
        let shape = StepShape::classify(step_code, &detail);
        info!(application_id, step = step_code, shape = shape.label(), "submitting step");

        match shape {
            StepShape::Form { subforms } => {
                self.save_form(application_id, step_code, &detail, acting_user)?;
                for subform in subforms {
                    self.submit_subform(application_id, Some(step_code), &subform, acting_user)?;
                }
            }
            StepShape::Wrapper { subforms } => {
                for subform in subforms {
                    self.submit_subform(application_id, Some(step_code), &subform, acting_user)?;
                }
            }
            StepShape::Subform { code } => {
                self.submit_subform(application_id, Some(step_code), &code, acting_user)?;
            }
        }
        Ok(true)
    }

    fn save_form(
        &self,
        application_id: &str,
        step_code: &str,
        detail: &StepDetail,
        acting_user: Option<&str>,
    ) -> Result<(), StepError> {
        let overrides = self.applicants.link_overrides(application_id, detail, acting_user)?;
        let entries = build_payload(
            detail,
            self.resolver.as_ref(),
            &overrides,
            ResolutionScope::for_step(application_id, step_code),
        );
        self.api.execute(
            ApiRequest::put(
                format!("/invt/{application_id}/form/{step_code}/data/save?"),
                save_body(&entries),
            )
            .acting_as(acting_user),
        )?;
        info!(application_id, step = step_code, fields = entries.len(), "form saved");
        Ok(())
    }

    /// Fills the first row of a sub-form, creating an empty row first when none exists.
    pub fn submit_subform(
        &self,
        application_id: &str,
        step_code: Option<&str>,
        subform: &str,
        acting_user: Option<&str>,
    ) -> Result<(), StepError> {
        let base = format!("/invt/{application_id}/subform/{subform}");
        let object_id = self.subform_object_id(&base, subform, acting_user)?;

        let schema = self.api.execute(
            ApiRequest::get(base.as_str())
                .query("object_id", &object_id)
                .acting_as(acting_user),
        )?;
        let detail = StepDetail::from_response(&schema);
        let overrides = self.applicants.link_overrides(application_id, &detail, acting_user)?;
        let entries = build_payload(
            &detail,
            self.resolver.as_ref(),
            &overrides,
            ResolutionScope::for_subform(application_id, step_code, subform),
        );

        self.api.execute(
            ApiRequest::put(
                format!("{base}/object/{object_id}/data/save?"),
                save_body(&entries),
            )
            .acting_as(acting_user),
        )?;
        info!(application_id, subform, object_id = %object_id, fields = entries.len(), "sub-form saved");
        Ok(())
    }

    fn subform_object_id(
        &self,
        base: &str,
        subform: &str,
        acting_user: Option<&str>,
    ) -> Result<String, StepError> {
        let listing = self
            .api
            .execute(ApiRequest::get(base).acting_as(acting_user))?;
        if let Some(id) = first_row_id(data_of(&listing)) {
            return Ok(id);
        }

        warn!(subform, "sub-form has no rows, creating an empty one");
        self.api.execute(
            ApiRequest::put(format!("{base}/data/save?"), json!({ "data": [{}] }))
                .acting_as(acting_user),
        )?;
        let reloaded = self
            .api
            .execute(ApiRequest::get(base).acting_as(acting_user))?;
        let data = data_of(&reloaded);
        first_row_id(data)
            .or_else(|| container_object_id(data))
            .ok_or_else(|| StepError::MissingObjectId {
                subform: subform.to_string(),
            })
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, info};

use crate::api::{data_of, id_text, ApiError, ApiRequest, RemoteApi};
use crate::workflows::schema::{build_payload, save_body, ResolutionScope, StepDetail, ValueResolver};

/// Field codes ending with this suffix link a row to the primary applicant.
pub const APPLICANT_LINK_SUFFIX: &str = "invt_applicant_people_information_id";

const APPLICANT_POPUP: &str = "f_invt_project_applicant_information";
const SHAREHOLDER_SUBFORM: &str = "share_holder";
const SHAREHOLDER_LINK: &str = "share_holder_invt_applicant_people_information_id";

#[derive(Debug, thiserror::Error)]
pub enum ApplicantError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("applicant popup for application {application_id} exposes no object id")]
    MissingObjectId { application_id: String },
}

/// Ensures exactly one primary applicant exists per application and remembers its id.
pub struct ApplicantIdentityResolver {
    api: Arc<dyn RemoteApi>,
    resolver: Arc<dyn ValueResolver>,
    cache: Mutex<HashMap<String, String>>,
}

impl ApplicantIdentityResolver {
    pub fn new(api: Arc<dyn RemoteApi>, resolver: Arc<dyn ValueResolver>) -> Self {
        Self {
            api,
            resolver,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached(&self, application_id: &str) -> Option<String> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(application_id)
            .cloned()
    }

    /// Returns the primary applicant id, reusing the shareholder link when one exists and
    /// otherwise filling the applicant popup once.
    pub fn ensure_primary_applicant(
        &self,
        application_id: &str,
        acting_user: Option<&str>,
    ) -> Result<String, ApplicantError> {
        if let Some(id) = self.cached(application_id) {
            return Ok(id);
        }

        let applicant_id = match self.shareholder_link(application_id, acting_user)? {
            Some(id) => {
                debug!(application_id, applicant = %id, "reusing shareholder applicant");
                id
            }
            None => self.fill_popup(application_id, acting_user)?,
        };

        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(application_id.to_string(), applicant_id.clone());
        Ok(applicant_id)
    }

    /// Overrides for every applicant link field in `detail`. Resolves the applicant only when
    /// such a field exists.
    pub fn link_overrides(
        &self,
        application_id: &str,
        detail: &StepDetail,
        acting_user: Option<&str>,
    ) -> Result<HashMap<String, Value>, ApplicantError> {
        let codes: Vec<&str> = detail
            .fields()
            .into_iter()
            .filter_map(|field| field.code())
            .filter(|code| code.ends_with(APPLICANT_LINK_SUFFIX))
            .collect();
        if codes.is_empty() {
            return Ok(HashMap::new());
        }

        let applicant_id = self.ensure_primary_applicant(application_id, acting_user)?;
        Ok(codes
            .into_iter()
            .map(|code| (code.to_string(), Value::String(applicant_id.clone())))
            .collect())
    }

    fn shareholder_link(
        &self,
        application_id: &str,
        acting_user: Option<&str>,
    ) -> Result<Option<String>, ApplicantError> {
        let response = self.api.execute(
            ApiRequest::get(format!("/invt/{application_id}/subform/{SHAREHOLDER_SUBFORM}"))
                .acting_as(acting_user),
        )?;

        Ok(rows(data_of(&response))
            .first()
            .and_then(|row| row.get("form_data"))
            .filter(|form_data| has_content(form_data))
            .and_then(|form_data| form_data.get(SHAREHOLDER_LINK))
            .and_then(id_text))
    }

    fn fill_popup(
        &self,
        application_id: &str,
        acting_user: Option<&str>,
    ) -> Result<String, ApplicantError> {
        let popup_path = format!("/invt/{application_id}/popup_subform/{APPLICANT_POPUP}");
        let listing = self
            .api
            .execute(ApiRequest::get(popup_path.as_str()).acting_as(acting_user))?;
        let object_id = popup_object_id(data_of(&listing)).ok_or_else(|| {
            ApplicantError::MissingObjectId {
                application_id: application_id.to_string(),
            }
        })?;

        let schema = self.api.execute(
            ApiRequest::get(popup_path.as_str())
                .query("object_id", &object_id)
                .acting_as(acting_user),
        )?;
        let detail = StepDetail::from_response(&schema);
        let entries = build_payload(
            &detail,
            self.resolver.as_ref(),
            &HashMap::new(),
            ResolutionScope::for_subform(application_id, None, APPLICANT_POPUP),
        );

        self.api.execute(
            ApiRequest::put(
                format!("{popup_path}/object/{object_id}/data/save?"),
                save_body(&entries),
            )
            .acting_as(acting_user),
        )?;
        info!(application_id, applicant = %object_id, fields = entries.len(), "primary applicant saved");
        Ok(object_id)
    }
}

fn rows(data: &Value) -> &[Value] {
    data.get("objects")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::String(text) => !text.is_empty(),
        _ => true,
    }
}

/// First row carrying `form_data`, else the first row, else the container object id.
fn popup_object_id(data: &Value) -> Option<String> {
    let rows = rows(data);
    rows.iter()
        .find(|row| row.get("form_data").is_some_and(has_content))
        .or_else(|| rows.first())
        .and_then(|row| row.get("id"))
        .and_then(id_text)
        .or_else(|| container_object_id(data))
}

pub(super) fn container_object_id(data: &Value) -> Option<String> {
    data.get("investment_info")
        .and_then(|info| info.get("object_id"))
        .and_then(id_text)
}

pub(super) fn first_row_id(data: &Value) -> Option<String> {
    rows(data).first().and_then(|row| row.get("id")).and_then(id_text)
}

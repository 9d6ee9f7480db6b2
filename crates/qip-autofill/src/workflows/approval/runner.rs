use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::site_visit;
use super::stages::{
    checker_phone, eligible_users, runs_site_visit_pre_steps, stage_config, ReturnRule,
    CERTIFICATE_STAGE,
};
use crate::api::{data_of, id_text, ApiError, ApiRequest, RemoteApi};
use crate::auth::{AuthError, StageUser, UserAuthenticator};
use crate::workflows::schema::domain::{number_of, text_of};

const MAX_ITERATIONS: usize = 20;
const DEFAULT_COMMENT: &str = "ក្រុមហ៊ុនបានរៀបចំលក្ខន្តិកៈអាចទទួលយកបាន។";
const RETURN_COMMENT: &str = "សូមពិនិត្យកែតម្រូវឡើងវិញ";
const DELEGATED_FLAG: &str = "assignment_to_sign_on_certificate_from_dpm";

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("stage {stage} requires signature_on_certificate, but none is offered")]
    MissingCertificateSignature { stage: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowAction {
    Submit,
    Return,
}

impl FlowAction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Return => "return",
        }
    }
}

/// Why the flow loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FlowOutcome {
    Returned { stage: u32, target: u32 },
    Unconfigured { stage: i64 },
    NothingPending { stage: u32 },
    IterationLimit,
    StageUnresolved,
    NoEligibleUser { stage: u32 },
}

impl FlowOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::StageUnresolved | Self::NoEligibleUser { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageAction {
    pub stage: u32,
    pub user: String,
    pub action: FlowAction,
    pub flow_order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowReport {
    pub outcome: FlowOutcome,
    pub actions: Vec<StageAction>,
}

/// Drives an application through the approval stages, acting as each stage's users.
pub struct ApprovalFlowRunner {
    api: Arc<dyn RemoteApi>,
    authenticator: Arc<dyn UserAuthenticator>,
    project_type: String,
    prefer_delegated_signature: bool,
    rng: Mutex<StdRng>,
}

impl ApprovalFlowRunner {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        authenticator: Arc<dyn UserAuthenticator>,
        project_type: impl Into<String>,
    ) -> Self {
        Self {
            api,
            authenticator,
            project_type: project_type.into(),
            prefer_delegated_signature: false,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Picks the certificate signature delegated from the department head when one is offered.
    pub fn prefer_delegated_signature(mut self, prefer: bool) -> Self {
        self.prefer_delegated_signature = prefer;
        self
    }

    /// `true` when the flow stopped successfully.
    pub fn submit_approval_flow(&self, application_id: &str, return_rule: Option<ReturnRule>) -> bool {
        match self.run(application_id, return_rule) {
            Ok(report) => report.outcome.is_success(),
            Err(err) => {
                warn!(application_id, error = %err, "approval flow failed");
                false
            }
        }
    }

    pub fn run(
        &self,
        application_id: &str,
        return_rule: Option<ReturnRule>,
    ) -> Result<FlowReport, ApprovalError> {
        let checker = StageUser::from_phone(checker_phone());
        let mut actions = Vec::new();

        for _ in 0..MAX_ITERATIONS {
            let checker_token = self.authenticator.bearer_for(&checker)?;
            let Some(current) = self.current_stage(application_id, &checker_token) else {
                warn!(application_id, "current stage could not be determined");
                return Ok(finish(FlowOutcome::StageUnresolved, actions));
            };
            info!(application_id, stage = current, "approval flow at stage");

            if let Some(rule) = return_rule.filter(|rule| i64::from(rule.trigger) == current) {
                match self.try_return(application_id, rule) {
                    Ok(Some(action)) => {
                        info!(application_id, stage = rule.trigger, target = rule.target, "returned");
                        actions.push(action);
                        let outcome = FlowOutcome::Returned {
                            stage: rule.trigger,
                            target: rule.target,
                        };
                        return Ok(finish(outcome, actions));
                    }
                    Ok(None) => {}
                    Err(err) => warn!(application_id, stage = rule.trigger, error = %err, "return failed"),
                }
            }

            let Some(stage) = u32::try_from(current).ok().and_then(stage_config) else {
                info!(application_id, stage = current, "no automation for stage");
                return Ok(finish(FlowOutcome::Unconfigured { stage: current }, actions));
            };

            let confirmation = self.confirmation(application_id, &checker_token)?;
            if !stage_needs_action(&confirmation, stage.key) {
                info!(application_id, stage = stage.key, "stage has no pending action");
                return Ok(finish(FlowOutcome::NothingPending { stage: stage.key }, actions));
            }

            let mut acted = false;
            for phone in eligible_users(stage) {
                acted = true;
                let token = self.authenticator.bearer_for(&StageUser::from_phone(phone))?;
                self.submit_action(application_id, &token, phone, stage.key, stage.target, FlowAction::Submit)?;
                info!(application_id, stage = stage.key, user = phone, next = stage.target, "stage submitted");
                actions.push(StageAction {
                    stage: stage.key,
                    user: phone.to_string(),
                    action: FlowAction::Submit,
                    flow_order: stage.target,
                });
            }
            if !acted {
                warn!(application_id, stage = stage.key, "no eligible user configured");
                return Ok(finish(FlowOutcome::NoEligibleUser { stage: stage.key }, actions));
            }
        }

        Ok(finish(FlowOutcome::IterationLimit, actions))
    }

    fn confirmation(&self, application_id: &str, token: &str) -> Result<Value, ApiError> {
        self.api
            .execute(ApiRequest::get(format!("/invt/{application_id}/confirmation")).bearer(token))
    }

    fn current_stage(&self, application_id: &str, token: &str) -> Option<i64> {
        let response = match self.confirmation(application_id, token) {
            Ok(response) => response,
            Err(err) => {
                debug!(application_id, error = %err, "confirmation unavailable");
                return None;
            }
        };
        data_of(&response)
            .get("stage_info")
            .and_then(|info| info.get("current"))
            .and_then(number_of)
            .map(|stage| stage as i64)
            .filter(|stage| *stage != 0)
    }

    /// Sends the flow back when the remote offers the target. `None` when no return happened.
    fn try_return(
        &self,
        application_id: &str,
        rule: ReturnRule,
    ) -> Result<Option<StageAction>, ApprovalError> {
        let Some(phone) = stage_config(rule.trigger).and_then(|stage| eligible_users(stage).next())
        else {
            warn!(application_id, stage = rule.trigger, "no eligible user for return");
            return Ok(None);
        };

        let token = self.authenticator.bearer_for(&StageUser::from_phone(phone))?;
        let confirmation = self.confirmation(application_id, &token)?;
        let allowed = allowed_return_stages(&confirmation);
        if !allowed.contains(&rule.target) {
            warn!(application_id, target = rule.target, ?allowed, "return target not offered");
            return Ok(None);
        }

        self.submit_action(application_id, &token, phone, rule.trigger, rule.target, FlowAction::Return)?;
        Ok(Some(StageAction {
            stage: rule.trigger,
            user: phone.to_string(),
            action: FlowAction::Return,
            flow_order: rule.target,
        }))
    }

    fn submit_action(
        &self,
        application_id: &str,
        token: &str,
        phone: &str,
        stage: u32,
        flow_order: u32,
        action: FlowAction,
    ) -> Result<Value, ApprovalError> {
        if action == FlowAction::Submit && runs_site_visit_pre_steps(phone, stage) {
            if let Err(err) = site_visit::run_pre_steps(self.api.as_ref(), application_id, token) {
                warn!(application_id, user = phone, error = %err, "site visit pre-steps failed or already done");
            }
        }

        let confirmation = self.confirmation(application_id, token)?;
        let payload = self.flow_payload(data_of(&confirmation), stage, flow_order, action)?;
        let path = format!("/investment_project/{application_id}/flow/{}", action.label());
        let response = self.api.execute(
            ApiRequest::put(path, payload)
                .query("step_code", "approval_flow")
                .query("project_type", &self.project_type)
                .bearer(token),
        )?;
        Ok(response)
    }

    fn flow_payload(
        &self,
        confirmation: &Value,
        stage: u32,
        flow_order: u32,
        action: FlowAction,
    ) -> Result<Value, ApprovalError> {
        let (signature, comment) = match action {
            FlowAction::Return => (Value::Null, RETURN_COMMENT.to_string()),
            FlowAction::Submit => {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                let signatures = preference_signatures(confirmation);
                let comments = preference_comments(confirmation);
                let signature = signatures
                    .choose(&mut *rng)
                    .map_or(Value::Null, |id| Value::String(id.clone()));
                let comment = comments
                    .choose(&mut *rng)
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_COMMENT.to_string());
                (signature, comment)
            }
        };

        let certificate = if stage == CERTIFICATE_STAGE {
            let options = confirmation
                .get("action_form")
                .and_then(|form| form.get("signature_on_certificate"))
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let id = pick_signature_id(options, self.prefer_delegated_signature)
                .ok_or(ApprovalError::MissingCertificateSignature { stage })?;
            Value::String(id)
        } else {
            Value::Null
        };

        let mut payload = json!({
            "attachment": null,
            "attachment_irc": null,
            "attachment_letter": null,
            "attachment_notification": null,
            "attachment_report": null,
            "certificate_related_document": {"new_docs": [], "remove_docs": []},
            "comment": comment,
            "letter_related_document": {"new_docs": [], "remove_docs": []},
            "notification_related_document": {"new_docs": [], "remove_docs": []},
            "preference_attachment_report_id": null,
            "preference_signature_id": signature,
            "signature": null,
            "signature_on_certificate": certificate,
            "flow_order": flow_order,
        });
        let meeting_flag = match action {
            FlowAction::Submit => "submit_for_one_stop_meeting",
            FlowAction::Return => "return_for_one_stop_meeting",
        };
        payload[meeting_flag] = json!(0);
        Ok(payload)
    }
}

fn finish(outcome: FlowOutcome, actions: Vec<StageAction>) -> FlowReport {
    FlowReport { outcome, actions }
}

fn flag_set(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(other) => number_of(other).is_some_and(|n| n == 1.0),
        None => false,
    }
}

/// A stage is pending while it is current and its flow node is not completed.
pub fn stage_needs_action(confirmation: &Value, stage: u32) -> bool {
    let data = data_of(confirmation);
    let current = data
        .get("stage_info")
        .and_then(|info| info.get("current"))
        .and_then(number_of);
    if current != Some(f64::from(stage)) {
        return false;
    }

    let node = data
        .get("flow_nodes")
        .and_then(Value::as_array)
        .and_then(|nodes| {
            nodes.iter().find(|node| {
                node.get("flow_order").and_then(number_of) == Some(f64::from(stage))
            })
        });
    !node.is_some_and(|node| flag_set(node.get("is_completed")))
}

fn allowed_return_stages(confirmation: &Value) -> Vec<u32> {
    data_of(confirmation)
        .get("action_form")
        .and_then(|form| form.get("return_stage"))
        .and_then(Value::as_array)
        .map(|stages| {
            stages
                .iter()
                .filter_map(|stage| stage.get("flow_order").and_then(number_of))
                .map(|order| order as u32)
                .collect()
        })
        .unwrap_or_default()
}

fn preference_signatures(confirmation: &Value) -> Vec<String> {
    confirmation
        .get("preference_signatures")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("signature").and_then(|sig| sig.get("id")))
                .filter_map(id_text)
                .collect()
        })
        .unwrap_or_default()
}

fn preference_comments(confirmation: &Value) -> Vec<String> {
    confirmation
        .get("preference_comments")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("comment").and_then(text_of))
                .collect()
        })
        .unwrap_or_default()
}

/// Certificate signature choice: a plain id list yields its first entry; otherwise the first
/// direct (or, when preferred, delegated) option, falling back to any option.
pub fn pick_signature_id(options: &[Value], prefer_delegated: bool) -> Option<String> {
    let first = options.first()?;
    if let Value::String(id) = first {
        return Some(id.clone());
    }

    let objects: Vec<&Value> = options.iter().filter(|option| option.is_object()).collect();
    let is_delegated = |option: &&Value| truthy(option.get(DELEGATED_FLAG));
    let delegated = objects.iter().copied().find(is_delegated);
    let direct = objects.iter().copied().find(|option| !is_delegated(option));

    let preferred = if prefer_delegated { delegated } else { direct };
    let picked = preferred.or(direct).or(delegated).or(objects.first().copied())?;
    picked
        .get("id")
        .and_then(id_text)
        .or_else(|| picked.get("value").and_then(id_text))
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_or_moved_stage_needs_no_action() {
        let completed = json!({"data": {
            "stage_info": {"current": 5},
            "flow_nodes": [{"flow_order": 5, "is_completed": 1}]
        }});
        assert!(!stage_needs_action(&completed, 5));

        let moved = json!({"data": {"stage_info": {"current": 6}, "flow_nodes": []}});
        assert!(!stage_needs_action(&moved, 5));

        let pending = json!({"data": {
            "stage_info": {"current": "5"},
            "flow_nodes": [{"flow_order": 5, "is_completed": 0}]
        }});
        assert!(stage_needs_action(&pending, 5));

        let no_node = json!({"data": {"stage_info": {"current": 5}}});
        assert!(stage_needs_action(&no_node, 5));
    }

    #[test]
    fn signature_pick_prefers_direct_unless_delegated_requested() {
        let options = vec![
            json!({"id": "delegated", "assignment_to_sign_on_certificate_from_dpm": 1}),
            json!({"id": "direct", "assignment_to_sign_on_certificate_from_dpm": 0}),
        ];
        assert_eq!(pick_signature_id(&options, false), Some("direct".to_string()));
        assert_eq!(pick_signature_id(&options, true), Some("delegated".to_string()));

        let only_delegated = vec![json!({"value": 7, "assignment_to_sign_on_certificate_from_dpm": true})];
        assert_eq!(pick_signature_id(&only_delegated, false), Some("7".to_string()));

        assert_eq!(pick_signature_id(&[json!("plain"), json!("other")], true), Some("plain".to_string()));
        assert_eq!(pick_signature_id(&[], false), None);
    }

    #[test]
    fn return_stages_are_read_from_action_form() {
        let confirmation = json!({"data": {"action_form": {"return_stage": [
            {"flow_order": 2}, {"flow_order": "3"}, {"name": "no order"}
        ]}}});
        assert_eq!(allowed_return_stages(&confirmation), vec![2, 3]);
        assert!(allowed_return_stages(&json!({})).is_empty());
    }

    #[test]
    fn failure_outcomes_are_not_success() {
        assert!(FlowOutcome::NothingPending { stage: 4 }.is_success());
        assert!(FlowOutcome::Returned { stage: 5, target: 3 }.is_success());
        assert!(!FlowOutcome::StageUnresolved.is_success());
        assert!(!FlowOutcome::NoEligibleUser { stage: 2 }.is_success());
    }
}

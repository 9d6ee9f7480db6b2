mod common;

use std::sync::{Arc, Mutex};

use common::FakeAuthenticator;
use qip_autofill::api::{ApiError, ApiRequest, HttpMethod, RemoteApi, RequestAuth};
use qip_autofill::workflows::approval::{
    ApprovalError, ApprovalFlowRunner, FlowAction, FlowOutcome, ReturnRule,
};
use serde_json::{json, Value};

const APPLICATION: &str = "app-1";

struct PortalState {
    current: i64,
    completed: bool,
    return_stages: Vec<u32>,
    certificate: Value,
    calls: Vec<ApiRequest>,
}

/// Portal whose confirmation reflects the flow actions it has received.
struct PortalStub {
    state: Mutex<PortalState>,
}

impl PortalStub {
    fn at_stage(current: i64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PortalState {
                current,
                completed: false,
                return_stages: Vec::new(),
                certificate: json!(["cert-1"]),
                calls: Vec::new(),
            }),
        })
    }

    fn configure(&self, apply: impl FnOnce(&mut PortalState)) {
        apply(&mut self.state.lock().expect("state lock"));
    }

    fn current(&self) -> i64 {
        self.state.lock().expect("state lock").current
    }

    fn calls_matching(&self, method: HttpMethod, fragment: &str) -> Vec<ApiRequest> {
        self.state
            .lock()
            .expect("state lock")
            .calls
            .iter()
            .filter(|call| call.method == method && call.path.contains(fragment))
            .cloned()
            .collect()
    }

    fn confirmation(state: &PortalState) -> Value {
        let return_stage: Vec<Value> = state
            .return_stages
            .iter()
            .map(|order| json!({"flow_order": order}))
            .collect();
        json!({"data": {
            "stage_info": {"current": state.current},
            "flow_nodes": [{"flow_order": state.current, "is_completed": state.completed}],
            "action_form": {
                "return_stage": return_stage,
                "signature_on_certificate": state.certificate,
            },
            "preference_signatures": [{"signature": {"id": "sig-1"}}],
            "preference_comments": [{"comment": "reviewed"}],
        }})
    }
}

impl RemoteApi for PortalStub {
    fn execute(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let mut state = self.state.lock().expect("state lock");
        state.calls.push(request.clone());

        let flow_order = request
            .body
            .as_ref()
            .and_then(|body| body.get("flow_order"))
            .and_then(Value::as_i64);
        match (request.method, request.path.as_str()) {
            (HttpMethod::Get, path) if path.ends_with("/confirmation") => Ok(Self::confirmation(&state)),
            (HttpMethod::Put, path) if path.ends_with("/flow/submit") => {
                if state.current == 13 {
                    state.completed = true;
                } else if let Some(order) = flow_order {
                    state.current = order;
                }
                Ok(json!({"data": {}}))
            }
            (HttpMethod::Put, path) if path.ends_with("/flow/return") => {
                if let Some(order) = flow_order {
                    state.current = order;
                }
                Ok(json!({"data": {}}))
            }
            (HttpMethod::Post, path) if path.ends_with("/composition") => {
                Ok(json!({"data": {"site_visit_id": 90}}))
            }
            _ => Ok(json!({"data": {}})),
        }
    }
}

fn runner(portal: &Arc<PortalStub>) -> (ApprovalFlowRunner, Arc<FakeAuthenticator>) {
    let authenticator = Arc::new(FakeAuthenticator::default());
    let runner = ApprovalFlowRunner::new(portal.clone(), authenticator.clone(), "qip").with_seed(3);
    (runner, authenticator)
}

#[test]
fn flow_advances_to_the_certificate_stage() {
    let portal = PortalStub::at_stage(5);
    let (runner, _) = runner(&portal);

    let report = runner.run(APPLICATION, None).expect("flow runs");

    assert_eq!(report.outcome, FlowOutcome::NothingPending { stage: 13 });
    let stages: Vec<u32> = report.actions.iter().map(|action| action.stage).collect();
    assert_eq!(stages, (5..=13).collect::<Vec<_>>());
    assert!(report
        .actions
        .iter()
        .all(|action| action.action == FlowAction::Submit));

    let submits = portal.calls_matching(HttpMethod::Put, "/flow/submit");
    assert_eq!(submits.len(), 9);
    let first = &submits[0];
    assert_eq!(first.path, "/investment_project/app-1/flow/submit");
    assert_eq!(first.query_value("step_code"), Some("approval_flow"));
    assert_eq!(first.query_value("project_type"), Some("qip"));
    assert_eq!(first.auth, RequestAuth::Bearer("token-012916188".to_string()));

    let body = first.body.as_ref().expect("submit body");
    assert_eq!(body["flow_order"], json!(6));
    assert_eq!(body["preference_signature_id"], json!("sig-1"));
    assert_eq!(body["comment"], json!("reviewed"));
    assert_eq!(body["submit_for_one_stop_meeting"], json!(0));
    assert!(body["signature_on_certificate"].is_null());

    let last = submits.last().and_then(|call| call.body.clone()).expect("final body");
    assert_eq!(last["flow_order"], json!(13));
    assert_eq!(last["signature_on_certificate"], json!("cert-1"));
}

#[test]
fn preliminary_stage_runs_site_visit_pre_steps_once() {
    let portal = PortalStub::at_stage(2);
    let (runner, authenticator) = runner(&portal);

    let report = runner.run(APPLICATION, None).expect("flow runs");
    assert_eq!(report.outcome, FlowOutcome::NothingPending { stage: 13 });

    let preliminary: Vec<&str> = report
        .actions
        .iter()
        .filter(|action| action.stage == 2)
        .map(|action| action.user.as_str())
        .collect();
    assert_eq!(preliminary, vec!["017581166", "093282238", "012910678", "012860067"]);
    let restricted: Vec<u32> = report
        .actions
        .iter()
        .filter(|action| action.user == "012860067")
        .map(|action| action.stage)
        .collect();
    assert_eq!(restricted, vec![2, 7]);

    assert_eq!(portal.calls_matching(HttpMethod::Get, "/site_visit/composition/form_v2").len(), 1);
    let members = portal.calls_matching(HttpMethod::Post, "/site_visit/app-1/composition");
    assert_eq!(members.len(), 2);
    assert!(members
        .iter()
        .all(|call| call.auth == RequestAuth::Bearer("token-012860067".to_string())));
    assert_eq!(portal.calls_matching(HttpMethod::Put, "/site_visit/90/draft").len(), 1);
    assert_eq!(portal.calls_matching(HttpMethod::Put, "/site_visit_report/90").len(), 1);

    let logins = authenticator.logins.lock().expect("logins lock");
    assert!(logins.iter().filter(|identity| *identity == "017581166").count() > 1);
}

#[test]
fn return_rule_sends_the_flow_back_once() {
    let portal = PortalStub::at_stage(6);
    portal.configure(|state| state.return_stages = vec![3, 4]);
    let (runner, _) = runner(&portal);

    let report = runner
        .run(APPLICATION, Some(ReturnRule { trigger: 6, target: 3 }))
        .expect("flow runs");

    assert_eq!(report.outcome, FlowOutcome::Returned { stage: 6, target: 3 });
    assert_eq!(report.actions.len(), 1);
    assert_eq!(report.actions[0].action, FlowAction::Return);
    assert_eq!(report.actions[0].user, "047770008");
    assert_eq!(portal.current(), 3);

    let returned = portal.calls_matching(HttpMethod::Put, "/flow/return");
    assert_eq!(returned.len(), 1);
    let body = returned[0].body.as_ref().expect("return body");
    assert!(body["preference_signature_id"].is_null());
    assert_eq!(body["return_for_one_stop_meeting"], json!(0));
    assert!(body.get("submit_for_one_stop_meeting").is_none());
    assert!(portal.calls_matching(HttpMethod::Put, "/flow/submit").is_empty());
}

#[test]
fn return_target_not_offered_falls_through_to_submit() {
    let portal = PortalStub::at_stage(12);
    let (runner, _) = runner(&portal);

    let report = runner
        .run(APPLICATION, Some(ReturnRule { trigger: 12, target: 3 }))
        .expect("flow runs");

    assert_eq!(report.outcome, FlowOutcome::NothingPending { stage: 13 });
    assert!(portal.calls_matching(HttpMethod::Put, "/flow/return").is_empty());
    let stages: Vec<u32> = report.actions.iter().map(|action| action.stage).collect();
    assert_eq!(stages, vec![12, 13]);
}

#[test]
fn unknown_current_stage_stops_without_success() {
    let portal = PortalStub::at_stage(0);
    let (runner, _) = runner(&portal);

    let report = runner.run(APPLICATION, None).expect("flow runs");
    assert_eq!(report.outcome, FlowOutcome::StageUnresolved);
    assert!(report.actions.is_empty());
    assert!(!runner.submit_approval_flow(APPLICATION, None));
}

#[test]
fn certificate_stage_without_signature_options_fails() {
    let portal = PortalStub::at_stage(13);
    portal.configure(|state| state.certificate = json!([]));
    let (runner, _) = runner(&portal);

    let err = runner.run(APPLICATION, None).expect_err("certificate required");
    assert!(matches!(err, ApprovalError::MissingCertificateSignature { stage: 13 }));
    assert!(portal.calls_matching(HttpMethod::Put, "/flow/submit").is_empty());
    assert!(!runner.submit_approval_flow(APPLICATION, None));
}

#[test]
fn unconfigured_stage_ends_the_flow() {
    let portal = PortalStub::at_stage(14);
    let (runner, _) = runner(&portal);

    let report = runner.run(APPLICATION, None).expect("flow runs");
    assert_eq!(report.outcome, FlowOutcome::Unconfigured { stage: 14 });
    assert!(report.outcome.is_success());
    assert!(runner.submit_approval_flow(APPLICATION, None));
}

#[test]
fn completed_stage_needs_no_action() {
    let portal = PortalStub::at_stage(9);
    portal.configure(|state| state.completed = true);
    let (runner, _) = runner(&portal);

    let report = runner.run(APPLICATION, None).expect("flow runs");
    assert_eq!(report.outcome, FlowOutcome::NothingPending { stage: 9 });
    assert!(report.actions.is_empty());
    assert!(portal.calls_matching(HttpMethod::Put, "/flow/").is_empty());
}

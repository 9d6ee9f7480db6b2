//! End-to-end driver: create or reuse an application, submit every step, then finalize.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};

use super::approval::{ApprovalError, ApprovalFlowRunner, ReturnRule};
use super::finalize::Finalizer;
use super::schema::{FieldValueResolver, MediaLibrary, OptionCatalog, OverrideRegistry, ValueResolver};
use super::steps::{ApplicantIdentityResolver, StepError, StepSubmitter};
use crate::api::{ApiError, FileUploader, HttpApiClient, RemoteApi};
use crate::auth::{
    EmptySessionStore, JsonSessionStore, SessionAuthenticator, SessionStore, StoreError,
    TokenManager,
};
use crate::config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Step(#[from] StepError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error("http client setup failed: {0}")]
    Client(#[from] ApiError),
    #[error("session store unavailable: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub acting_user: Option<String>,
    pub finalize: bool,
    pub return_rule: Option<ReturnRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub step: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl StageReport {
    fn failed(stage: &'static str, err: &dyn std::fmt::Display) -> Self {
        error!(stage, error = %err, "finalization stage failed");
        Self {
            stage,
            ok: false,
            detail: Some(json!(err.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub application_id: String,
    pub steps: Vec<StepReport>,
    pub finalization: Vec<StageReport>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.steps.iter().all(|step| step.ok) && self.finalization.iter().all(|stage| stage.ok)
    }
}

pub struct ApplicationRunner {
    submitter: Arc<StepSubmitter>,
    finalizer: Arc<Finalizer>,
    approval: Arc<ApprovalFlowRunner>,
    store: Arc<dyn SessionStore>,
}

impl ApplicationRunner {
    pub fn new(
        submitter: Arc<StepSubmitter>,
        finalizer: Arc<Finalizer>,
        approval: Arc<ApprovalFlowRunner>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            submitter,
            finalizer,
            approval,
            store,
        }
    }

    /// Wires the HTTP client, session store, resolver, and workflow services from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, RunnerError> {
        let store: Arc<dyn SessionStore> = match &config.auth.session_store {
            Some(path) => Arc::new(JsonSessionStore::open(path)?),
            None => Arc::new(EmptySessionStore),
        };
        let tokens = TokenManager::new(store.clone(), config.auth.password.clone())
            .with_override(
                config.auth.override_access_token.clone(),
                config.auth.override_refresh_token.clone(),
            )
            .with_default_user(config.auth.investor_user_id.clone());
        let client = Arc::new(HttpApiClient::new(&config.api, tokens)?);
        let api: Arc<dyn RemoteApi> = client.clone();
        let uploader: Arc<dyn FileUploader> = client;

        let media = MediaLibrary::from_config(&config.media);
        let resolver: Arc<dyn ValueResolver> = Arc::new(FieldValueResolver::new(
            Arc::new(OptionCatalog::new(api.clone())),
            uploader.clone(),
            media.clone(),
            Arc::new(OverrideRegistry::standard()),
        ));
        let applicants = Arc::new(ApplicantIdentityResolver::new(api.clone(), resolver.clone()));
        let submitter = Arc::new(StepSubmitter::new(
            api.clone(),
            resolver,
            applicants,
            &config.api,
        ));
        let finalizer = Arc::new(Finalizer::new(
            api.clone(),
            uploader,
            media,
            config.payment.clone(),
        ));
        let authenticator = Arc::new(SessionAuthenticator::new(
            api.clone(),
            store.clone(),
            config.auth.password.clone(),
        ));
        let approval = Arc::new(ApprovalFlowRunner::new(
            api,
            authenticator,
            config.api.project_type.clone(),
        ));

        Ok(Self::new(submitter, finalizer, approval, store))
    }

    pub fn steps(&self) -> &StepSubmitter {
        &self.submitter
    }

    pub fn approval(&self) -> &ApprovalFlowRunner {
        &self.approval
    }

    pub fn finalizer(&self) -> &Finalizer {
        &self.finalizer
    }

    pub fn session_store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    /// Runs every step in order. Only application creation and the step list are fatal;
    /// each step and finalization stage is isolated and reported.
    pub fn run(&self, application_id: Option<&str>, options: &RunOptions) -> Result<RunReport, RunnerError> {
        let acting = options.acting_user.as_deref();
        let application_id = match application_id {
            Some(id) => id.to_string(),
            None => self.submitter.create_application(acting)?,
        };
        let steps = self.submitter.list_steps(acting)?;
        info!(application_id = %application_id, steps = steps.len(), "running application steps");

        let steps = steps
            .into_iter()
            .map(|step| match self.submitter.submit_step(&application_id, &step.code, acting) {
                Ok(ok) => StepReport {
                    step: step.code,
                    ok,
                    error: None,
                },
                Err(err) => {
                    error!(application_id = %application_id, step = %step.code, error = %err, "step failed");
                    StepReport {
                        step: step.code,
                        ok: false,
                        error: Some(err.to_string()),
                    }
                }
            })
            .collect();

        let finalization = if options.finalize {
            self.finalize(&application_id, options)
        } else {
            Vec::new()
        };

        Ok(RunReport {
            application_id,
            steps,
            finalization,
        })
    }

    fn finalize(&self, application_id: &str, options: &RunOptions) -> Vec<StageReport> {
        let acting = options.acting_user.as_deref();
        let mut stages = Vec::new();

        stages.push(match self.finalizer.submit_signature(application_id, acting) {
            Ok(_) => StageReport {
                stage: "signature",
                ok: true,
                detail: None,
            },
            Err(err) => StageReport::failed("signature", &err),
        });

        stages.push(match self.finalizer.submit_payment(application_id, acting) {
            Ok(invoice_code) => StageReport {
                stage: "payment",
                ok: true,
                detail: Some(json!({ "invoice_code": invoice_code })),
            },
            Err(err) => StageReport::failed("payment", &err),
        });

        stages.push(match self.finalizer.wait_for_invoice_paid(application_id, acting) {
            Ok(status) => StageReport {
                stage: "invoice",
                ok: status.is_paid(),
                detail: serde_json::to_value(&status).ok(),
            },
            Err(err) => StageReport::failed("invoice", &err),
        });

        stages.push(match self.approval.run(application_id, options.return_rule) {
            Ok(report) => StageReport {
                stage: "approval",
                ok: report.outcome.is_success(),
                detail: serde_json::to_value(&report).ok(),
            },
            Err(err) => StageReport::failed("approval", &err),
        });

        stages
    }
}

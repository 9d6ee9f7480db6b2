//! Post-submission stages: application signature, invoice payment, and the paid-invoice wait.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{data_of, id_text, ApiError, ApiRequest, FileUploader, RemoteApi};
use crate::config::PaymentConfig;
use crate::workflows::schema::domain::text_of;
use crate::workflows::schema::{MediaError, MediaFolder, MediaLibrary};

const PAID: &str = "paid";

#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("payment endpoint and token must both be configured")]
    MissingPaymentCredentials,
    #[error("confirmation for application {application_id} carries no osp_invoice_code")]
    MissingInvoiceCode { application_id: String },
}

/// Last observed invoice state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceStatus {
    pub status: Option<String>,
    pub paid_datetime: Option<String>,
    pub invoice_code: Option<String>,
}

impl InvoiceStatus {
    pub fn is_paid(&self) -> bool {
        self.status.as_deref() == Some(PAID)
    }

    fn from_confirmation(response: &Value) -> Self {
        let invoice = data_of(response).get("invoice").unwrap_or(&Value::Null);
        Self {
            status: invoice
                .get("invoice_status")
                .and_then(|status| status.get("keyword"))
                .and_then(text_of),
            paid_datetime: invoice.get("paid_datetime").and_then(text_of),
            invoice_code: invoice.get("osp_invoice_code").and_then(id_text),
        }
    }
}

pub struct Finalizer {
    api: Arc<dyn RemoteApi>,
    uploader: Arc<dyn FileUploader>,
    media: MediaLibrary,
    payment: PaymentConfig,
    rng: Mutex<StdRng>,
}

impl Finalizer {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        uploader: Arc<dyn FileUploader>,
        media: MediaLibrary,
        payment: PaymentConfig,
    ) -> Self {
        Self {
            api,
            uploader,
            media,
            payment,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    fn confirmation(&self, application_id: &str, acting_user: Option<&str>) -> Result<Value, ApiError> {
        self.api.execute(
            ApiRequest::get(format!("/invt/{application_id}/confirmation")).acting_as(acting_user),
        )
    }

    /// Signs the application with a random signature image.
    pub fn submit_signature(
        &self,
        application_id: &str,
        acting_user: Option<&str>,
    ) -> Result<Value, FinalizeError> {
        if let Err(err) = self.confirmation(application_id, acting_user) {
            warn!(application_id, error = %err, "confirmation check failed, signing anyway");
        }

        let path = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            self.media.random_image(MediaFolder::Signature, &mut *rng)?
        };
        let response = self.uploader.sign_application(application_id, &path)?;
        info!(application_id, file = %path.display(), "application signed");
        Ok(response)
    }

    /// Requests direct payment of the application's invoice. Returns the invoice code paid.
    pub fn submit_payment(
        &self,
        application_id: &str,
        acting_user: Option<&str>,
    ) -> Result<String, FinalizeError> {
        let confirmation = self.confirmation(application_id, acting_user)?;
        let (Some(endpoint), Some(token)) = (self.payment.endpoint.as_deref(), self.payment.token.as_deref())
        else {
            return Err(FinalizeError::MissingPaymentCredentials);
        };
        let invoice_code = InvoiceStatus::from_confirmation(&confirmation)
            .invoice_code
            .ok_or_else(|| FinalizeError::MissingInvoiceCode {
                application_id: application_id.to_string(),
            })?;

        self.api.execute(
            ApiRequest::post(endpoint, None)
                .query("reference_number", &invoice_code)
                .bearer(token),
        )?;
        info!(application_id, invoice = %invoice_code, "payment requested");
        Ok(invoice_code)
    }

    /// Current invoice state from the confirmation endpoint.
    pub fn invoice_status(
        &self,
        application_id: &str,
        acting_user: Option<&str>,
    ) -> Result<InvoiceStatus, FinalizeError> {
        let confirmation = self.confirmation(application_id, acting_user)?;
        Ok(InvoiceStatus::from_confirmation(&confirmation))
    }

    /// Polls until the invoice is paid or the configured timeout passes; returns the last state.
    pub fn wait_for_invoice_paid(
        &self,
        application_id: &str,
        acting_user: Option<&str>,
    ) -> Result<InvoiceStatus, FinalizeError> {
        let started = Instant::now();
        loop {
            let status = self.invoice_status(application_id, acting_user)?;
            debug!(application_id, status = ?status.status, "invoice polled");
            if status.is_paid() {
                info!(application_id, paid_at = ?status.paid_datetime, "invoice paid");
                return Ok(status);
            }
            if started.elapsed() >= self.payment.timeout {
                warn!(application_id, status = ?status.status, "invoice not paid before timeout");
                return Ok(status);
            }
            thread::sleep(self.payment.poll_interval);
        }
    }
}

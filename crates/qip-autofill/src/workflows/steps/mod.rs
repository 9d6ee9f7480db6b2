//! Step discovery and submission, including the primary applicant link.

mod applicant;
mod submitter;

pub use applicant::{ApplicantError, ApplicantIdentityResolver, APPLICANT_LINK_SUFFIX};
pub use submitter::{StepError, StepInfo, StepShape, StepSubmitter};

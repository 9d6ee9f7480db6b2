//! Multi-stage approval workflow driven as the configured stage users.

mod runner;
mod site_visit;
pub mod stages;

pub use runner::{
    pick_signature_id, stage_needs_action, ApprovalError, ApprovalFlowRunner, FlowAction,
    FlowOutcome, FlowReport, StageAction,
};
pub use stages::{ApprovalStage, PhoneRule, ReturnRule};

use serde::{Deserialize, Serialize};

/// Stage whose first user checks progress and whose flagged user runs the site-visit pre-steps.
pub const PRELIMINARY_STAGE: u32 = 2;
/// Terminal stage; its action must carry a certificate signature.
pub const CERTIFICATE_STAGE: u32 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalStage {
    pub key: u32,
    pub name: &'static str,
    pub users: &'static [&'static str],
    pub target: u32,
}

/// Restricts a user to specific stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhoneRule {
    pub phone: &'static str,
    pub only_stages: &'static [u32],
    pub site_visit_pre_steps: bool,
}

/// One-shot return edge: when the flow reaches `trigger`, send it back to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRule {
    pub trigger: u32,
    pub target: u32,
}

const fn stage(
    key: u32,
    name: &'static str,
    users: &'static [&'static str],
    target: u32,
) -> ApprovalStage {
    ApprovalStage {
        key,
        name,
        users,
        target,
    }
}

pub static STAGES: [ApprovalStage; 12] = [
    stage(
        2,
        "Preliminary Review",
        &["017581166", "093282238", "012910678", "012860067"],
        3,
    ),
    stage(3, "Mission Approval", &["099902345"], 4),
    stage(4, "OSS Meeting Request", &["012345692"], 5),
    stage(5, "OSS Meeting Approval", &["012916188"], 6),
    stage(6, "Site Visit Comments", &["047770008"], 7),
    stage(7, "Site Visit Report Draft", &["012860067"], 8),
    stage(8, "Site Visit Report Submit", &["099902345"], 9),
    stage(9, "Incentive Proposal Draft", &["093282238"], 10),
    stage(10, "Incentive Proposal Request", &["012865228"], 11),
    stage(11, "Incentive Proposal Review", &["099902345"], 12),
    stage(12, "Incentive Pre-Approval", &["012345692"], 13),
    stage(13, "Incentive Approval", &["012916188"], 13),
];

pub static PHONE_RULES: [PhoneRule; 1] = [PhoneRule {
    phone: "012860067",
    only_stages: &[2, 7],
    site_visit_pre_steps: true,
}];

pub fn stage_config(key: u32) -> Option<&'static ApprovalStage> {
    STAGES.iter().find(|stage| stage.key == key)
}

pub fn phone_rule(phone: &str) -> Option<&'static PhoneRule> {
    PHONE_RULES.iter().find(|rule| rule.phone == phone)
}

/// Users without a rule may act on any stage.
pub fn may_act(phone: &str, stage: u32) -> bool {
    phone_rule(phone).map_or(true, |rule| rule.only_stages.contains(&stage))
}

pub fn runs_site_visit_pre_steps(phone: &str, stage: u32) -> bool {
    stage == PRELIMINARY_STAGE && phone_rule(phone).is_some_and(|rule| rule.site_visit_pre_steps)
}

/// Identity used to read the current stage.
pub fn checker_phone() -> &'static str {
    STAGES[0].users[0]
}

/// Users of `stage` allowed to act on it, in configured order.
pub fn eligible_users(stage: &ApprovalStage) -> impl Iterator<Item = &'static str> + '_ {
    let key = stage.key;
    stage.users.iter().copied().filter(move |phone| may_act(phone, key))
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::case::{CaseFacts, IssueCategory, Resolution};
use crate::domain::order::OrderStatus;

/// Resolved policy parameters for one (category, issue) pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnPolicy {
    pub return_window_days: i64,
    pub refund_shipping: bool,
    pub requires_evidence_for: Vec<IssueCategory>,
    pub non_returnable_categories: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Eligible,
    WindowExpired,
    CategoryNonReturnable,
    NotDelivered,
    EvidenceMissing,
    CancelProcessing,
    RepeatClaims,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eligible => "eligible",
            Self::WindowExpired => "window_expired",
            Self::CategoryNonReturnable => "category_non_returnable",
            Self::NotDelivered => "not_delivered",
            Self::EvidenceMissing => "evidence_missing",
            Self::CancelProcessing => "cancel_processing",
            Self::RepeatClaims => "repeat_claims",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyConstraint {
    EvidenceRequired,
    ManualReview,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundType {
    Full,
    Partial,
    None,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayoutBreakdown {
    pub item: Decimal,
    pub shipping: Decimal,
}

/// Pure output of the policy engine. Recomputed from scratch whenever facts
/// change, never mutated in place. Its verdict is authoritative over any
/// advisor suggestion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub eligible: bool,
    pub reason_codes: Vec<ReasonCode>,
    /// Resolutions policy allows for these facts, in preference order
    /// (replacement before refund).
    pub allowed_resolutions: Vec<Resolution>,
    /// Intersection of the customer's request with `allowed_resolutions`.
    /// Falls back to the allowed list when the request itself is not
    /// allowed, so the customer is shown what policy does permit.
    pub offered_resolutions: Vec<Resolution>,
    pub payout: Decimal,
    pub breakdown: PayoutBreakdown,
    pub refund_type: RefundType,
    pub constraints: Vec<PolicyConstraint>,
}

impl PolicyDecision {
    fn ineligible(reason: ReasonCode, constraints: Vec<PolicyConstraint>) -> Self {
        Self {
            eligible: false,
            reason_codes: vec![reason],
            allowed_resolutions: Vec::new(),
            offered_resolutions: Vec::new(),
            payout: Decimal::ZERO,
            breakdown: PayoutBreakdown { item: Decimal::ZERO, shipping: Decimal::ZERO },
            refund_type: RefundType::None,
            constraints,
        }
    }
}

// Sessions with this many prior resolutions on damage claims go to manual
// review instead of automatic approval.
const REPEAT_CLAIM_LIMIT: u32 = 3;

/// Deterministic, total decision function over complete case facts. No I/O,
/// no clock: delivery age arrives precomputed inside the facts.
#[derive(Clone, Debug, Default)]
pub struct PolicyEngine;

impl PolicyEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn policy_for(
        &self,
        item_category: &str,
        issue: IssueCategory,
        delivered: bool,
    ) -> ReturnPolicy {
        let mut policy = ReturnPolicy {
            return_window_days: 30,
            refund_shipping: false,
            requires_evidence_for: vec![
                IssueCategory::Damaged,
                IssueCategory::Defective,
                IssueCategory::WrongItem,
            ],
            non_returnable_categories: vec![
                "perishable".to_string(),
                "personal_care".to_string(),
            ],
        };

        if item_category.eq_ignore_ascii_case("electronics") {
            policy.return_window_days = 15;
        }
        if issue.is_damage_claim() {
            policy.refund_shipping = true;
        }
        if !delivered && issue != IssueCategory::LateDelivery {
            policy.return_window_days = 0;
        }

        policy
    }

    pub fn decide(&self, facts: &CaseFacts) -> PolicyDecision {
        let policy = self.policy_for(&facts.item_category, facts.issue, facts.delivered);

        // Cancellation of a still-processing order: no goods moved, nothing
        // to pay out; the charge is voided upstream.
        if facts.requested == Resolution::Cancellation
            && facts.order_status == OrderStatus::Processing
        {
            return PolicyDecision {
                eligible: true,
                reason_codes: vec![ReasonCode::CancelProcessing],
                allowed_resolutions: vec![Resolution::Cancellation],
                offered_resolutions: vec![Resolution::Cancellation],
                payout: Decimal::ZERO,
                breakdown: PayoutBreakdown { item: Decimal::ZERO, shipping: Decimal::ZERO },
                refund_type: RefundType::None,
                constraints: Vec::new(),
            };
        }

        if !facts.delivered && facts.issue != IssueCategory::LateDelivery {
            return PolicyDecision::ineligible(ReasonCode::NotDelivered, Vec::new());
        }

        if policy
            .non_returnable_categories
            .iter()
            .any(|category| category.eq_ignore_ascii_case(&facts.item_category))
        {
            return PolicyDecision::ineligible(ReasonCode::CategoryNonReturnable, Vec::new());
        }

        if let Some(days) = facts.days_since_delivery {
            if days > policy.return_window_days && facts.issue != IssueCategory::Damaged {
                return PolicyDecision::ineligible(ReasonCode::WindowExpired, Vec::new());
            }
        }

        if policy.requires_evidence_for.contains(&facts.issue) && facts.accepted_evidence == 0 {
            return PolicyDecision::ineligible(
                ReasonCode::EvidenceMissing,
                vec![PolicyConstraint::EvidenceRequired],
            );
        }

        if facts.issue.is_damage_claim() && facts.prior_resolutions >= REPEAT_CLAIM_LIMIT {
            return PolicyDecision::ineligible(
                ReasonCode::RepeatClaims,
                vec![PolicyConstraint::ManualReview],
            );
        }

        let allowed = allowed_resolutions(facts.issue);
        let offered: Vec<Resolution> = if allowed.contains(&facts.requested) {
            allowed.iter().copied().filter(|r| *r == facts.requested).collect()
        } else {
            allowed.clone()
        };

        let (payout, breakdown, refund_type) = compute_payout(facts, &policy);

        PolicyDecision {
            eligible: true,
            reason_codes: vec![ReasonCode::Eligible],
            allowed_resolutions: allowed,
            offered_resolutions: offered,
            payout,
            breakdown,
            refund_type,
            constraints: Vec::new(),
        }
    }
}

/// Policy-allowed resolutions per issue, in preference order.
fn allowed_resolutions(issue: IssueCategory) -> Vec<Resolution> {
    match issue {
        IssueCategory::Damaged
        | IssueCategory::Defective
        | IssueCategory::WrongItem
        | IssueCategory::NotAsDescribed => vec![Resolution::Replacement, Resolution::Refund],
        IssueCategory::ChangedMind => vec![Resolution::Refund],
        IssueCategory::LateDelivery => vec![Resolution::Refund, Resolution::Escalation],
    }
}

fn compute_payout(
    facts: &CaseFacts,
    policy: &ReturnPolicy,
) -> (Decimal, PayoutBreakdown, RefundType) {
    let affected = facts.quantity_affected.min(facts.quantity_ordered).max(1);
    let item_component = facts.item_price * Decimal::from(affected);

    let full_quantity = affected == facts.quantity_ordered;
    let shipping_component = if policy.refund_shipping
        && full_quantity
        && facts.issue != IssueCategory::ChangedMind
    {
        facts.shipping_fee
    } else {
        Decimal::ZERO
    };

    let payout = item_component + shipping_component;
    let refund_type = if full_quantity { RefundType::Full } else { RefundType::Partial };

    (payout, PayoutBreakdown { item: item_component, shipping: shipping_component }, refund_type)
}

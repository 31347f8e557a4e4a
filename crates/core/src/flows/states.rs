use serde::{Deserialize, Serialize};

use crate::domain::session::SlotKey;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Identifying,
    Selecting,
    Classifying,
    CollectingEvidence,
    Deciding,
    Confirming,
    Resolved,
    Escalated,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identifying => "identifying",
            Self::Selecting => "selecting",
            Self::Classifying => "classifying",
            Self::CollectingEvidence => "collecting_evidence",
            Self::Deciding => "deciding",
            Self::Confirming => "confirming",
            Self::Resolved => "resolved",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "identifying" => Some(Self::Identifying),
            "selecting" => Some(Self::Selecting),
            "classifying" => Some(Self::Classifying),
            "collecting_evidence" => Some(Self::CollectingEvidence),
            "deciding" => Some(Self::Deciding),
            "confirming" => Some(Self::Confirming),
            "resolved" => Some(Self::Resolved),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }

    /// Resolved and Escalated absorb every event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Escalated)
    }

    /// Slots that must be filled before the stage's exit transition fires.
    pub fn required_slots(&self) -> &'static [SlotKey] {
        match self {
            Self::Identifying => &[SlotKey::OrderId],
            Self::Selecting => &[SlotKey::ItemId],
            Self::Classifying => &[SlotKey::IssueCategory, SlotKey::RequestedResolution],
            Self::CollectingEvidence => &[SlotKey::EvidenceRef],
            Self::Deciding | Self::Confirming | Self::Resolved | Self::Escalated => &[],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    OrderResolved,
    IdentityRetryExhausted,
    ItemSelected,
    IssueClassified { needs_evidence: bool },
    EvidenceAccepted,
    DecisionReached,
    ResolutionAccepted,
    ResolutionDeclined,
    CorrectionRequested,
    EvidenceCorrectionRequested,
    EscalationRequested,
}

/// Guard inputs computed by the caller before a transition is attempted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageContext {
    pub missing_slots: Vec<SlotKey>,
    pub identity_attempts: u32,
    pub identity_retry_budget: u32,
    pub evidence_validated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    ListOrderItems,
    RequestClarification,
    RequestEvidence,
    InvokePolicy,
    PresentResolution,
    ExecuteResolution,
    CreateEscalation,
    CloseSession,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: Stage,
    pub to: Stage,
    pub event: SessionEvent,
    pub actions: Vec<SessionAction>,
}

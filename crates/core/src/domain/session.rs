use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::flows::states::{Stage, TransitionOutcome};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

/// Named datum collected over one or more turns before a resolution can be
/// computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKey {
    OrderId,
    Email,
    PhoneLast4,
    ItemId,
    IssueCategory,
    RequestedResolution,
    EvidenceRef,
}

impl SlotKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderId => "order_id",
            Self::Email => "email",
            Self::PhoneLast4 => "phone_last4",
            Self::ItemId => "item_id",
            Self::IssueCategory => "issue_category",
            Self::RequestedResolution => "requested_resolution",
            Self::EvidenceRef => "evidence_ref",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "order_id" => Some(Self::OrderId),
            "email" => Some(Self::Email),
            "phone_last4" => Some(Self::PhoneLast4),
            "item_id" => Some(Self::ItemId),
            "issue_category" => Some(Self::IssueCategory),
            "requested_resolution" => Some(Self::RequestedResolution),
            "evidence_ref" => Some(Self::EvidenceRef),
            _ => None,
        }
    }
}

/// A slot is either pending (requested from the customer, value not yet
/// usable) or filled with a validated value. Absent slots simply have no
/// entry in the map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Pending,
    Filled(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMap {
    entries: BTreeMap<SlotKey, SlotState>,
}

impl SlotMap {
    pub fn get(&self, key: SlotKey) -> Option<&SlotState> {
        self.entries.get(&key)
    }

    pub fn filled(&self, key: SlotKey) -> Option<&str> {
        match self.entries.get(&key) {
            Some(SlotState::Filled(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn is_filled(&self, key: SlotKey) -> bool {
        self.filled(key).is_some()
    }

    pub fn mark_pending(&mut self, key: SlotKey) {
        self.entries.entry(key).or_insert(SlotState::Pending);
    }

    /// Fill a slot with a validated value. A filled slot is never silently
    /// overwritten; use [`SlotMap::correct`] for the explicit correction path.
    pub fn fill(&mut self, key: SlotKey, value: impl Into<String>) -> Result<(), DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::InvariantViolation(format!(
                "slot {} cannot be filled with an empty value",
                key.as_str()
            )));
        }
        match self.entries.get(&key) {
            Some(SlotState::Filled(existing)) if existing != &value => {
                Err(DomainError::SlotOverwrite { slot: key.as_str() })
            }
            _ => {
                self.entries.insert(key, SlotState::Filled(value));
                Ok(())
            }
        }
    }

    /// Explicit correction: replaces whatever is present.
    pub fn correct(&mut self, key: SlotKey, value: impl Into<String>) {
        self.entries.insert(key, SlotState::Filled(value.into()));
    }

    pub fn missing_of(&self, required: &[SlotKey]) -> Vec<SlotKey> {
        required.iter().copied().filter(|key| !self.is_filled(*key)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-session distrust level. Downgrades are one-way: once a session is
/// restricted to deterministic-only behavior it stays restricted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    #[default]
    Standard,
    Restricted,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub stage: Stage,
    pub slots: SlotMap,
    pub trust: TrustLevel,
    pub identity_attempts: u32,
    pub damage_claim_count: u32,
    pub open: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            stage: Stage::Identifying,
            slots: SlotMap::default(),
            trust: TrustLevel::Standard,
            identity_attempts: 0,
            damage_claim_count: 0,
            open: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn restrict(&mut self) {
        self.trust = TrustLevel::Restricted;
        self.updated_at = Utc::now();
    }

    pub fn is_restricted(&self) -> bool {
        self.trust == TrustLevel::Restricted
    }

    pub fn record_identity_attempt(&mut self) {
        self.identity_attempts += 1;
        self.updated_at = Utc::now();
    }

    pub fn record_damage_claim(&mut self) {
        self.damage_claim_count += 1;
        self.updated_at = Utc::now();
    }

    /// Commit a transition atomically: the stage and any slot updates change
    /// together, or the session is left untouched. Slot updates are applied
    /// to a scratch copy first so a rejected fill cannot leave a half-applied
    /// map behind.
    pub fn commit_transition(
        &mut self,
        outcome: &TransitionOutcome,
        slot_updates: Vec<(SlotKey, String)>,
    ) -> Result<(), DomainError> {
        if !self.open {
            return Err(DomainError::SessionClosed { session: self.id.0.clone() });
        }
        if self.stage != outcome.from {
            return Err(DomainError::InvariantViolation(format!(
                "transition computed from stage {} but session is in {}",
                outcome.from.as_str(),
                self.stage.as_str()
            )));
        }

        let mut staged = self.slots.clone();
        for (key, value) in slot_updates {
            staged.fill(key, value)?;
        }

        self.slots = staged;
        self.stage = outcome.to.clone();
        if self.stage.is_terminal() {
            self.open = false;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::flows::states::{SessionAction, SessionEvent, Stage, TransitionOutcome};

    use super::{Session, SessionId, SlotKey, SlotMap, SlotState};

    fn outcome(from: Stage, to: Stage) -> TransitionOutcome {
        TransitionOutcome {
            from,
            to,
            event: SessionEvent::OrderResolved,
            actions: vec![SessionAction::ListOrderItems],
        }
    }

    #[test]
    fn filled_slot_rejects_silent_overwrite() {
        let mut slots = SlotMap::default();
        slots.fill(SlotKey::OrderId, "ORD-1001").expect("first fill");
        assert!(slots.fill(SlotKey::OrderId, "ORD-9999").is_err());
        assert_eq!(slots.filled(SlotKey::OrderId), Some("ORD-1001"));
    }

    #[test]
    fn refilling_with_identical_value_is_idempotent() {
        let mut slots = SlotMap::default();
        slots.fill(SlotKey::OrderId, "ORD-1001").expect("first fill");
        slots.fill(SlotKey::OrderId, "ORD-1001").expect("same value is fine");
    }

    #[test]
    fn correction_overwrites_filled_slot() {
        let mut slots = SlotMap::default();
        slots.fill(SlotKey::IssueCategory, "damaged").expect("fill");
        slots.correct(SlotKey::IssueCategory, "defective");
        assert_eq!(slots.filled(SlotKey::IssueCategory), Some("defective"));
    }

    #[test]
    fn pending_slot_counts_as_missing() {
        let mut slots = SlotMap::default();
        slots.mark_pending(SlotKey::ItemId);
        assert_eq!(slots.get(SlotKey::ItemId), Some(&SlotState::Pending));
        assert_eq!(slots.missing_of(&[SlotKey::ItemId]), vec![SlotKey::ItemId]);
    }

    #[test]
    fn commit_is_atomic_when_slot_update_is_rejected() {
        let mut session = Session::new(SessionId("S-1".to_string()));
        session.slots.fill(SlotKey::OrderId, "ORD-1001").expect("fill");

        let result = session.commit_transition(
            &outcome(Stage::Identifying, Stage::Selecting),
            vec![(SlotKey::OrderId, "ORD-2002".to_string())],
        );

        assert!(result.is_err());
        assert_eq!(session.stage, Stage::Identifying);
        assert_eq!(session.slots.filled(SlotKey::OrderId), Some("ORD-1001"));
    }

    #[test]
    fn commit_applies_stage_and_slots_together() {
        let mut session = Session::new(SessionId("S-2".to_string()));
        session
            .commit_transition(
                &outcome(Stage::Identifying, Stage::Selecting),
                vec![(SlotKey::OrderId, "ORD-1001".to_string())],
            )
            .expect("commit");

        assert_eq!(session.stage, Stage::Selecting);
        assert_eq!(session.slots.filled(SlotKey::OrderId), Some("ORD-1001"));
        assert!(session.open);
    }

    #[test]
    fn terminal_commit_closes_session_and_further_commits_fail() {
        let mut session = Session::new(SessionId("S-3".to_string()));
        session
            .commit_transition(&outcome(Stage::Identifying, Stage::Escalated), Vec::new())
            .expect("commit to terminal");

        assert!(!session.open);
        let again =
            session.commit_transition(&outcome(Stage::Escalated, Stage::Identifying), Vec::new());
        assert!(again.is_err());
    }
}

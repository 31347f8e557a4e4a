use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::{ItemId, Order, OrderId, OrderStatus};
use crate::domain::session::SessionId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaseId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Damaged,
    Defective,
    WrongItem,
    NotAsDescribed,
    ChangedMind,
    LateDelivery,
}

impl IssueCategory {
    pub const ALL: [IssueCategory; 6] = [
        Self::Damaged,
        Self::Defective,
        Self::WrongItem,
        Self::NotAsDescribed,
        Self::ChangedMind,
        Self::LateDelivery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Damaged => "damaged",
            Self::Defective => "defective",
            Self::WrongItem => "wrong_item",
            Self::NotAsDescribed => "not_as_described",
            Self::ChangedMind => "changed_mind",
            Self::LateDelivery => "late_delivery",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "damaged" => Some(Self::Damaged),
            "defective" => Some(Self::Defective),
            "wrong_item" => Some(Self::WrongItem),
            "not_as_described" => Some(Self::NotAsDescribed),
            "changed_mind" => Some(Self::ChangedMind),
            "late_delivery" => Some(Self::LateDelivery),
            _ => None,
        }
    }

    /// Damage-style claims require at least one accepted evidence record
    /// before the policy engine will grant eligibility.
    pub fn is_damage_claim(&self) -> bool {
        matches!(self, Self::Damaged | Self::Defective | Self::WrongItem)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Replacement,
    Refund,
    Cancellation,
    Escalation,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replacement => "replacement",
            Self::Refund => "refund",
            Self::Cancellation => "cancellation",
            Self::Escalation => "escalation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "replacement" => Some(Self::Replacement),
            "refund" => Some(Self::Refund),
            "cancellation" => Some(Self::Cancellation),
            "escalation" => Some(Self::Escalation),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStatus {
    Accepted,
    Rejected,
}

/// The core only ever holds a reference and review status; raw evidence
/// bytes live with the external evidence service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub reference: String,
    pub status: EvidenceStatus,
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub session_id: SessionId,
    pub order_id: OrderId,
    pub item_id: ItemId,
    pub issue: IssueCategory,
    pub requested: Resolution,
    pub evidence: Vec<EvidenceRecord>,
    pub quantity_ordered: u32,
    pub quantity_affected: u32,
    pub committed: bool,
    pub created_at: DateTime<Utc>,
}

impl Case {
    pub fn accepted_evidence_count(&self) -> u32 {
        self.evidence.iter().filter(|record| record.status == EvidenceStatus::Accepted).count()
            as u32
    }

    pub fn attach_evidence(&mut self, record: EvidenceRecord) -> Result<(), DomainError> {
        self.ensure_mutable()?;
        self.evidence.push(record);
        Ok(())
    }

    /// Marks the case immutable. Called when the first terminal tool call
    /// (create return / label / escalation) commits.
    pub fn commit(&mut self) -> Result<(), DomainError> {
        self.ensure_mutable()?;
        self.committed = true;
        Ok(())
    }

    fn ensure_mutable(&self) -> Result<(), DomainError> {
        if self.committed {
            return Err(DomainError::CaseCommitted { case: self.id.0.clone() });
        }
        Ok(())
    }

    /// Project the case plus its order into the immutable fact set the
    /// policy engine decides on.
    pub fn facts(&self, order: &Order, prior_resolutions: u32, today: NaiveDate) -> CaseFacts {
        CaseFacts {
            item_category: order.item_category.clone(),
            issue: self.issue,
            requested: self.requested,
            order_status: order.status.clone(),
            delivered: order.delivery_date.is_some(),
            days_since_delivery: order.days_since_delivery(today),
            item_price: order.item_price,
            shipping_fee: order.shipping_fee,
            quantity_ordered: self.quantity_ordered,
            quantity_affected: self.quantity_affected,
            accepted_evidence: self.accepted_evidence_count(),
            prior_resolutions,
        }
    }
}

/// Immutable input to the policy engine. All time arithmetic happens before
/// construction so the decision function stays pure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseFacts {
    pub item_category: String,
    pub issue: IssueCategory,
    pub requested: Resolution,
    pub order_status: OrderStatus,
    pub delivered: bool,
    pub days_since_delivery: Option<i64>,
    pub item_price: Decimal,
    pub shipping_fee: Decimal,
    pub quantity_ordered: u32,
    pub quantity_affected: u32,
    pub accepted_evidence: u32,
    pub prior_resolutions: u32,
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use crate::domain::order::{ItemId, Order, OrderId, OrderStatus};
    use crate::domain::session::SessionId;

    use super::{Case, CaseId, EvidenceRecord, EvidenceStatus, IssueCategory, Resolution};

    fn case_fixture() -> Case {
        Case {
            id: CaseId("C-1".to_string()),
            session_id: SessionId("S-1".to_string()),
            order_id: OrderId("ORD-1001".to_string()),
            item_id: ItemId("ITEM-1".to_string()),
            issue: IssueCategory::Damaged,
            requested: Resolution::Refund,
            evidence: Vec::new(),
            quantity_ordered: 2,
            quantity_affected: 1,
            committed: false,
            created_at: Utc::now(),
        }
    }

    fn order_fixture() -> Order {
        Order {
            id: OrderId("ORD-1001".to_string()),
            merchant_id: "M-001".to_string(),
            customer_email_masked: "al***@example.com".to_string(),
            customer_phone_last4: "1234".to_string(),
            item_id: ItemId("ITEM-1".to_string()),
            item_category: "electronics".to_string(),
            order_date: NaiveDate::from_ymd_opt(2025, 12, 1).expect("date"),
            delivery_date: NaiveDate::from_ymd_opt(2025, 12, 5),
            item_price: Decimal::new(12_000, 2),
            shipping_fee: Decimal::new(1_000, 2),
            quantity: 2,
            status: OrderStatus::Delivered,
        }
    }

    #[test]
    fn only_accepted_evidence_is_counted() {
        let mut case = case_fixture();
        case.attach_evidence(EvidenceRecord {
            reference: "EV-1".to_string(),
            status: EvidenceStatus::Rejected,
            note: Some("photo too dark".to_string()),
        })
        .expect("attach");
        assert_eq!(case.accepted_evidence_count(), 0);

        case.attach_evidence(EvidenceRecord {
            reference: "EV-2".to_string(),
            status: EvidenceStatus::Accepted,
            note: None,
        })
        .expect("attach");
        assert_eq!(case.accepted_evidence_count(), 1);
    }

    #[test]
    fn committed_case_rejects_further_mutation() {
        let mut case = case_fixture();
        case.commit().expect("commit");
        let result = case.attach_evidence(EvidenceRecord {
            reference: "EV-3".to_string(),
            status: EvidenceStatus::Accepted,
            note: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn facts_projection_carries_delivery_age() {
        let case = case_fixture();
        let order = order_fixture();
        let today = NaiveDate::from_ymd_opt(2026, 1, 4).expect("date");

        let facts = case.facts(&order, 0, today);

        assert!(facts.delivered);
        assert_eq!(facts.days_since_delivery, Some(30));
        assert_eq!(facts.quantity_ordered, 2);
        assert_eq!(facts.accepted_evidence, 0);
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::case::IssueCategory;
use crate::domain::order::{ItemId, OrderId};
use crate::domain::session::SessionId;
use crate::domain::tooling::OperationKey;

/// Return merchandise authorization issued when a resolution executes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReturnAuthorization {
    pub rma_id: String,
    pub session_id: SessionId,
    pub order_id: OrderId,
    pub item_id: ItemId,
    pub issue: IssueCategory,
    pub quantity: u32,
    pub refund_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingLabel {
    pub label_id: String,
    pub rma_id: String,
    pub carrier: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationTicket {
    pub ticket_id: String,
    pub session_id: SessionId,
    pub order_id: Option<OrderId>,
    pub reason: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

// Identifiers are derived from the operation key so a replayed create call
// mints the same id it minted the first time.

pub fn rma_id(key: &OperationKey) -> String {
    format!("RMA-{}", key.digest())
}

pub fn label_id(key: &OperationKey) -> String {
    format!("LBL-{}", key.digest())
}

pub fn escalation_id(key: &OperationKey) -> String {
    format!("ESC-{}", key.digest())
}

use sqlx::{sqlite::SqliteRow, Row};

use caseflow_core::domain::case::IssueCategory;
use caseflow_core::domain::fulfillment::{EscalationTicket, ReturnAuthorization, ShippingLabel};
use caseflow_core::domain::order::{ItemId, OrderId};
use caseflow_core::domain::session::SessionId;

use super::order::{parse_decimal, parse_u32};
use super::session::parse_timestamp;
use super::{FulfillmentRepository, RepositoryError};
use crate::DbPool;

pub struct SqlFulfillmentRepository {
    pool: DbPool,
}

impl SqlFulfillmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl FulfillmentRepository for SqlFulfillmentRepository {
    async fn save_return(&self, rma: ReturnAuthorization) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO return_authorizations (
                rma_id,
                session_id,
                order_id,
                item_id,
                issue,
                quantity,
                refund_amount,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(rma_id) DO NOTHING",
        )
        .bind(&rma.rma_id)
        .bind(&rma.session_id.0)
        .bind(&rma.order_id.0)
        .bind(&rma.item_id.0)
        .bind(rma.issue.as_str())
        .bind(i64::from(rma.quantity))
        .bind(rma.refund_amount.to_string())
        .bind(rma.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_return(
        &self,
        rma_id: &str,
    ) -> Result<Option<ReturnAuthorization>, RepositoryError> {
        let row = sqlx::query(
            "SELECT rma_id, session_id, order_id, item_id, issue, quantity, refund_amount, created_at
             FROM return_authorizations
             WHERE rma_id = ?",
        )
        .bind(rma_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(return_from_row).transpose()
    }

    async fn save_label(&self, label: ShippingLabel) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO shipping_labels (label_id, rma_id, carrier, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(label_id) DO NOTHING",
        )
        .bind(&label.label_id)
        .bind(&label.rma_id)
        .bind(&label.carrier)
        .bind(label.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_label(&self, label_id: &str) -> Result<Option<ShippingLabel>, RepositoryError> {
        let row = sqlx::query(
            "SELECT label_id, rma_id, carrier, created_at FROM shipping_labels WHERE label_id = ?",
        )
        .bind(label_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(label_from_row).transpose()
    }

    async fn save_escalation(&self, ticket: EscalationTicket) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO escalation_tickets (ticket_id, session_id, order_id, reason, summary, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(ticket_id) DO NOTHING",
        )
        .bind(&ticket.ticket_id)
        .bind(&ticket.session_id.0)
        .bind(ticket.order_id.as_ref().map(|id| id.0.as_str()))
        .bind(&ticket.reason)
        .bind(&ticket.summary)
        .bind(ticket.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_escalation(
        &self,
        ticket_id: &str,
    ) -> Result<Option<EscalationTicket>, RepositoryError> {
        let row = sqlx::query(
            "SELECT ticket_id, session_id, order_id, reason, summary, created_at
             FROM escalation_tickets
             WHERE ticket_id = ?",
        )
        .bind(ticket_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(escalation_from_row).transpose()
    }

    async fn count_returns_for_order(&self, order_id: &OrderId) -> Result<u32, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM return_authorizations WHERE order_id = ?",
        )
        .bind(&order_id.0)
        .fetch_one(&self.pool)
        .await?;

        parse_u32("count", row.try_get("count")?)
    }
}

fn return_from_row(row: SqliteRow) -> Result<ReturnAuthorization, RepositoryError> {
    let issue_raw = row.try_get::<String, _>("issue")?;
    let issue = IssueCategory::parse(&issue_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown issue category `{issue_raw}`")))?;

    Ok(ReturnAuthorization {
        rma_id: row.try_get("rma_id")?,
        session_id: SessionId(row.try_get("session_id")?),
        order_id: OrderId(row.try_get("order_id")?),
        item_id: ItemId(row.try_get("item_id")?),
        issue,
        quantity: parse_u32("quantity", row.try_get("quantity")?)?,
        refund_amount: parse_decimal("refund_amount", row.try_get("refund_amount")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn label_from_row(row: SqliteRow) -> Result<ShippingLabel, RepositoryError> {
    Ok(ShippingLabel {
        label_id: row.try_get("label_id")?,
        rma_id: row.try_get("rma_id")?,
        carrier: row.try_get("carrier")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn escalation_from_row(row: SqliteRow) -> Result<EscalationTicket, RepositoryError> {
    Ok(EscalationTicket {
        ticket_id: row.try_get("ticket_id")?,
        session_id: SessionId(row.try_get("session_id")?),
        order_id: row.try_get::<Option<String>, _>("order_id")?.map(OrderId),
        reason: row.try_get("reason")?,
        summary: row.try_get("summary")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

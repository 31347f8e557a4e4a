use async_trait::async_trait;
use thiserror::Error;

use caseflow_core::domain::fulfillment::{EscalationTicket, ReturnAuthorization, ShippingLabel};
use caseflow_core::domain::order::{Order, OrderId, OrderIdentifier};
use caseflow_core::domain::session::{Session, SessionId};
use caseflow_core::domain::tooling::{IdempotencyRecord, OperationKey, ToolCallRecord};

pub mod fulfillment;
pub mod memory;
pub mod order;
pub mod session;
pub mod tooling;

pub use fulfillment::SqlFulfillmentRepository;
pub use memory::{
    InMemoryFulfillmentRepository, InMemoryIdempotencyRepository, InMemoryOrderRepository,
    InMemorySessionRepository, InMemoryToolCallRepository,
};
pub use order::SqlOrderRepository;
pub use session::SqlSessionRepository;
pub use tooling::{SqlIdempotencyRepository, SqlToolCallRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;
    async fn find_by_email(&self, email: &str) -> Result<Vec<Order>, RepositoryError>;
    async fn find_by_phone_last4(&self, last4: &str) -> Result<Vec<Order>, RepositoryError>;
    /// `contact_email` is the raw account email kept for lookup only; the
    /// order record itself carries the masked form.
    async fn save(&self, order: Order, contact_email: &str) -> Result<(), RepositoryError>;

    async fn resolve(&self, identifier: &OrderIdentifier) -> Result<Vec<Order>, RepositoryError> {
        match identifier {
            OrderIdentifier::OrderId(id) => {
                let found = self.find_by_id(&OrderId(id.clone())).await?;
                Ok(found.into_iter().collect())
            }
            OrderIdentifier::Email(email) => self.find_by_email(email).await,
            OrderIdentifier::PhoneLast4(last4) => self.find_by_phone_last4(last4).await,
        }
    }
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError>;
    async fn save(&self, session: Session) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ToolCallRepository: Send + Sync {
    async fn append(&self, record: ToolCallRecord) -> Result<(), RepositoryError>;
    async fn list_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ToolCallRecord>, RepositoryError>;
}

#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    async fn find_operation(
        &self,
        operation_key: &OperationKey,
    ) -> Result<Option<IdempotencyRecord>, RepositoryError>;

    async fn save_operation(&self, record: IdempotencyRecord) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait FulfillmentRepository: Send + Sync {
    async fn save_return(&self, rma: ReturnAuthorization) -> Result<(), RepositoryError>;
    async fn find_return(&self, rma_id: &str)
        -> Result<Option<ReturnAuthorization>, RepositoryError>;
    async fn save_label(&self, label: ShippingLabel) -> Result<(), RepositoryError>;
    async fn find_label(&self, label_id: &str) -> Result<Option<ShippingLabel>, RepositoryError>;
    async fn save_escalation(&self, ticket: EscalationTicket) -> Result<(), RepositoryError>;
    async fn find_escalation(
        &self,
        ticket_id: &str,
    ) -> Result<Option<EscalationTicket>, RepositoryError>;
    /// Prior resolutions on an order, used by the policy engine's repeat
    /// claim check.
    async fn count_returns_for_order(&self, order_id: &OrderId) -> Result<u32, RepositoryError>;
}

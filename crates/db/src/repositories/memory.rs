use std::collections::HashMap;

use tokio::sync::RwLock;

use caseflow_core::domain::fulfillment::{EscalationTicket, ReturnAuthorization, ShippingLabel};
use caseflow_core::domain::order::{Order, OrderId};
use caseflow_core::domain::session::{Session, SessionId};
use caseflow_core::domain::tooling::{IdempotencyRecord, OperationKey, ToolCallRecord};

use super::{
    FulfillmentRepository, IdempotencyRepository, OrderRepository, RepositoryError,
    SessionRepository, ToolCallRepository,
};

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<String, (Order, String)>>,
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        Ok(orders.get(&id.0).map(|(order, _)| order.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<Order>, RepositoryError> {
        let needle = email.trim().to_ascii_lowercase();
        let orders = self.orders.read().await;
        let mut found: Vec<Order> = orders
            .values()
            .filter(|(_, contact)| contact == &needle)
            .map(|(order, _)| order.clone())
            .collect();
        found.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(found)
    }

    async fn find_by_phone_last4(&self, last4: &str) -> Result<Vec<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        let mut found: Vec<Order> = orders
            .values()
            .filter(|(order, _)| order.customer_phone_last4 == last4)
            .map(|(order, _)| order.clone())
            .collect();
        found.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(found)
    }

    async fn save(&self, order: Order, contact_email: &str) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().await;
        orders
            .insert(order.id.0.clone(), (order, contact_email.trim().to_ascii_lowercase()));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id.0).cloned())
    }

    async fn save(&self, session: Session) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.0.clone(), session);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryToolCallRepository {
    calls: RwLock<Vec<ToolCallRecord>>,
}

#[async_trait::async_trait]
impl ToolCallRepository for InMemoryToolCallRepository {
    async fn append(&self, record: ToolCallRecord) -> Result<(), RepositoryError> {
        let mut calls = self.calls.write().await;
        calls.push(record);
        Ok(())
    }

    async fn list_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ToolCallRecord>, RepositoryError> {
        let calls = self.calls.read().await;
        Ok(calls.iter().filter(|record| &record.session_id == session_id).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryIdempotencyRepository {
    operations: RwLock<HashMap<String, IdempotencyRecord>>,
}

#[async_trait::async_trait]
impl IdempotencyRepository for InMemoryIdempotencyRepository {
    async fn find_operation(
        &self,
        operation_key: &OperationKey,
    ) -> Result<Option<IdempotencyRecord>, RepositoryError> {
        let operations = self.operations.read().await;
        Ok(operations.get(&operation_key.0).cloned())
    }

    async fn save_operation(&self, record: IdempotencyRecord) -> Result<(), RepositoryError> {
        let mut operations = self.operations.write().await;
        operations.insert(record.operation_key.0.clone(), record);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryFulfillmentRepository {
    returns: RwLock<HashMap<String, ReturnAuthorization>>,
    labels: RwLock<HashMap<String, ShippingLabel>>,
    escalations: RwLock<HashMap<String, EscalationTicket>>,
}

#[async_trait::async_trait]
impl FulfillmentRepository for InMemoryFulfillmentRepository {
    async fn save_return(&self, rma: ReturnAuthorization) -> Result<(), RepositoryError> {
        let mut returns = self.returns.write().await;
        returns.insert(rma.rma_id.clone(), rma);
        Ok(())
    }

    async fn find_return(
        &self,
        rma_id: &str,
    ) -> Result<Option<ReturnAuthorization>, RepositoryError> {
        let returns = self.returns.read().await;
        Ok(returns.get(rma_id).cloned())
    }

    async fn save_label(&self, label: ShippingLabel) -> Result<(), RepositoryError> {
        let mut labels = self.labels.write().await;
        labels.insert(label.label_id.clone(), label);
        Ok(())
    }

    async fn find_label(&self, label_id: &str) -> Result<Option<ShippingLabel>, RepositoryError> {
        let labels = self.labels.read().await;
        Ok(labels.get(label_id).cloned())
    }

    async fn save_escalation(&self, ticket: EscalationTicket) -> Result<(), RepositoryError> {
        let mut escalations = self.escalations.write().await;
        escalations.insert(ticket.ticket_id.clone(), ticket);
        Ok(())
    }

    async fn find_escalation(
        &self,
        ticket_id: &str,
    ) -> Result<Option<EscalationTicket>, RepositoryError> {
        let escalations = self.escalations.read().await;
        Ok(escalations.get(ticket_id).cloned())
    }

    async fn count_returns_for_order(&self, order_id: &OrderId) -> Result<u32, RepositoryError> {
        let returns = self.returns.read().await;
        Ok(returns.values().filter(|rma| &rma.order_id == order_id).count() as u32)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use caseflow_core::domain::case::IssueCategory;
    use caseflow_core::domain::fulfillment::ReturnAuthorization;
    use caseflow_core::domain::order::{ItemId, Order, OrderId, OrderIdentifier, OrderStatus};
    use caseflow_core::domain::session::{Session, SessionId};

    use crate::repositories::{
        FulfillmentRepository, InMemoryFulfillmentRepository, InMemoryOrderRepository,
        InMemorySessionRepository, OrderRepository, SessionRepository,
    };

    fn order_fixture(id: &str, phone_last4: &str) -> Order {
        Order {
            id: OrderId(id.to_string()),
            merchant_id: "M-001".to_string(),
            customer_email_masked: "al***@example.com".to_string(),
            customer_phone_last4: phone_last4.to_string(),
            item_id: ItemId("ITEM-1".to_string()),
            item_category: "electronics".to_string(),
            order_date: NaiveDate::from_ymd_opt(2025, 12, 1).expect("date"),
            delivery_date: NaiveDate::from_ymd_opt(2025, 12, 5),
            item_price: Decimal::new(12_000, 2),
            shipping_fee: Decimal::new(1_000, 2),
            quantity: 1,
            status: OrderStatus::Delivered,
        }
    }

    #[tokio::test]
    async fn order_lookup_by_each_identifier_kind() {
        let repo = InMemoryOrderRepository::default();
        repo.save(order_fixture("ORD-1001", "1234"), "alice@example.com").await.expect("save");
        repo.save(order_fixture("ORD-1002", "9876"), "bob@example.com").await.expect("save");

        let by_id = repo
            .resolve(&OrderIdentifier::OrderId("ORD-1001".to_string()))
            .await
            .expect("resolve by id");
        assert_eq!(by_id.len(), 1);

        let by_email = repo
            .resolve(&OrderIdentifier::Email("Alice@Example.com".to_string()))
            .await
            .expect("resolve by email");
        assert_eq!(by_email.len(), 1);
        assert_eq!(by_email[0].id.0, "ORD-1001");

        let by_phone = repo
            .resolve(&OrderIdentifier::PhoneLast4("9876".to_string()))
            .await
            .expect("resolve by phone");
        assert_eq!(by_phone.len(), 1);
        assert_eq!(by_phone[0].id.0, "ORD-1002");

        let miss = repo
            .resolve(&OrderIdentifier::OrderId("ORD-9999".to_string()))
            .await
            .expect("resolve miss");
        assert!(miss.is_empty());
    }

    #[tokio::test]
    async fn session_repo_round_trip() {
        let repo = InMemorySessionRepository::default();
        let session = Session::new(SessionId("S-1".to_string()));

        repo.save(session.clone()).await.expect("save session");
        let found = repo.find_by_id(&session.id).await.expect("find session");

        assert_eq!(found, Some(session));
    }

    #[tokio::test]
    async fn return_count_tracks_prior_resolutions_per_order() {
        let repo = InMemoryFulfillmentRepository::default();
        let order_id = OrderId("ORD-1001".to_string());

        for n in 0..2 {
            repo.save_return(ReturnAuthorization {
                rma_id: format!("RMA-{n:012}"),
                session_id: SessionId(format!("S-{n}")),
                order_id: order_id.clone(),
                item_id: ItemId("ITEM-1".to_string()),
                issue: IssueCategory::Damaged,
                quantity: 1,
                refund_amount: Decimal::new(4_000, 2),
                created_at: Utc::now(),
            })
            .await
            .expect("save return");
        }

        let count = repo.count_returns_for_order(&order_id).await.expect("count");
        assert_eq!(count, 2);

        let other = repo
            .count_returns_for_order(&OrderId("ORD-2002".to_string()))
            .await
            .expect("count other");
        assert_eq!(other, 0);
    }
}

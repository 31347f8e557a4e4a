use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use caseflow_core::domain::order::{mask_email, ItemId, Order, OrderId, OrderStatus};

use crate::repositories::{OrderRepository, RepositoryError, SqlOrderRepository};
use crate::DbPool;

#[derive(Clone, Debug, Serialize)]
pub struct SeedSummary {
    pub orders_inserted: usize,
}

struct SeedOrder {
    id: &'static str,
    email: &'static str,
    phone_last4: &'static str,
    item_id: &'static str,
    category: &'static str,
    ordered: (i32, u32, u32),
    delivered: Option<(i32, u32, u32)>,
    price_cents: i64,
    shipping_cents: i64,
    quantity: u32,
    status: OrderStatus,
}

// Covers every policy branch: electronics short window, standard window,
// non-returnable category, undelivered, and a multi-quantity order.
const SEED_ORDERS: &[SeedOrder] = &[
    SeedOrder {
        id: "ORD-1001",
        email: "alice@example.com",
        phone_last4: "1234",
        item_id: "ITEM-TV-55",
        category: "electronics",
        ordered: (2025, 12, 1),
        delivered: Some((2025, 12, 5)),
        price_cents: 12_000,
        shipping_cents: 1_000,
        quantity: 1,
        status: OrderStatus::Delivered,
    },
    SeedOrder {
        id: "ORD-1002",
        email: "alice@example.com",
        phone_last4: "1234",
        item_id: "ITEM-COAT-M",
        category: "fashion",
        ordered: (2026, 1, 10),
        delivered: Some((2026, 1, 14)),
        price_cents: 4_000,
        shipping_cents: 0,
        quantity: 1,
        status: OrderStatus::Delivered,
    },
    SeedOrder {
        id: "ORD-1003",
        email: "bob@example.com",
        phone_last4: "9876",
        item_id: "ITEM-CHEESE",
        category: "perishable",
        ordered: (2026, 2, 1),
        delivered: Some((2026, 2, 3)),
        price_cents: 1_800,
        shipping_cents: 500,
        quantity: 2,
        status: OrderStatus::Delivered,
    },
    SeedOrder {
        id: "ORD-1004",
        email: "bob@example.com",
        phone_last4: "9876",
        item_id: "ITEM-LAMP",
        category: "home",
        ordered: (2026, 2, 20),
        delivered: None,
        price_cents: 2_500,
        shipping_cents: 700,
        quantity: 1,
        status: OrderStatus::Processing,
    },
    SeedOrder {
        id: "ORD-1005",
        email: "carol@example.com",
        phone_last4: "4321",
        item_id: "ITEM-MUG-SET",
        category: "kitchen",
        ordered: (2026, 2, 15),
        delivered: None,
        price_cents: 3_200,
        shipping_cents: 600,
        quantity: 4,
        status: OrderStatus::Shipped,
    },
];

pub async fn seed_demo_dataset(pool: &DbPool) -> Result<SeedSummary, RepositoryError> {
    let repo = SqlOrderRepository::new(pool.clone());

    for seed in SEED_ORDERS {
        let (oy, om, od) = seed.ordered;
        let order_date = NaiveDate::from_ymd_opt(oy, om, od)
            .ok_or_else(|| RepositoryError::Decode(format!("bad seed order date for {}", seed.id)))?;
        let delivery_date = seed
            .delivered
            .map(|(dy, dm, dd)| {
                NaiveDate::from_ymd_opt(dy, dm, dd).ok_or_else(|| {
                    RepositoryError::Decode(format!("bad seed delivery date for {}", seed.id))
                })
            })
            .transpose()?;

        let order = Order {
            id: OrderId(seed.id.to_string()),
            merchant_id: "M-001".to_string(),
            customer_email_masked: mask_email(seed.email),
            customer_phone_last4: seed.phone_last4.to_string(),
            item_id: ItemId(seed.item_id.to_string()),
            item_category: seed.category.to_string(),
            order_date,
            delivery_date,
            item_price: Decimal::new(seed.price_cents, 2),
            shipping_fee: Decimal::new(seed.shipping_cents, 2),
            quantity: seed.quantity,
            status: seed.status.clone(),
        };
        repo.save(order, seed.email).await?;
    }

    Ok(SeedSummary { orders_inserted: SEED_ORDERS.len() })
}

#[cfg(test)]
mod tests {
    use caseflow_core::domain::order::{OrderId, OrderIdentifier};

    use crate::repositories::{OrderRepository, SqlOrderRepository};
    use crate::{connect_with_settings, migrations};

    use super::seed_demo_dataset;

    #[tokio::test]
    async fn seed_inserts_orders_with_masked_emails() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");

        let summary = seed_demo_dataset(&pool).await.expect("seed");
        assert_eq!(summary.orders_inserted, 5);

        let repo = SqlOrderRepository::new(pool.clone());
        let order = repo
            .find_by_id(&OrderId("ORD-1001".to_string()))
            .await
            .expect("find")
            .expect("seeded order exists");
        assert_eq!(order.customer_email_masked, "al***@example.com");
        assert!(!order.customer_email_masked.contains("alice"));

        let alice_orders = repo
            .resolve(&OrderIdentifier::Email("alice@example.com".to_string()))
            .await
            .expect("resolve");
        assert_eq!(alice_orders.len(), 2);

        pool.close().await;
    }

    #[tokio::test]
    async fn seed_is_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");

        seed_demo_dataset(&pool).await.expect("first seed");
        let summary = seed_demo_dataset(&pool).await.expect("second seed");
        assert_eq!(summary.orders_inserted, 5);

        pool.close().await;
    }
}

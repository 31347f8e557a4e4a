use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use caseflow_core::domain::order::{ItemId, Order, OrderId, OrderStatus};

use super::{OrderRepository, RepositoryError};
use crate::DbPool;

const ORDER_COLUMNS: &str = "id,
    merchant_id,
    customer_email_masked,
    customer_phone_last4,
    item_id,
    item_category,
    order_date,
    delivery_date,
    item_price,
    shipping_fee,
    quantity,
    status";

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(order_from_row).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE customer_email_lookup = ? ORDER BY id ASC"
        ))
        .bind(email.trim().to_ascii_lowercase())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(order_from_row).collect()
    }

    async fn find_by_phone_last4(&self, last4: &str) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE customer_phone_last4 = ? ORDER BY id ASC"
        ))
        .bind(last4)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(order_from_row).collect()
    }

    async fn save(&self, order: Order, contact_email: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO orders (
                id,
                merchant_id,
                customer_email_masked,
                customer_email_lookup,
                customer_phone_last4,
                item_id,
                item_category,
                order_date,
                delivery_date,
                item_price,
                shipping_fee,
                quantity,
                status
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                merchant_id = excluded.merchant_id,
                customer_email_masked = excluded.customer_email_masked,
                customer_email_lookup = excluded.customer_email_lookup,
                customer_phone_last4 = excluded.customer_phone_last4,
                item_id = excluded.item_id,
                item_category = excluded.item_category,
                order_date = excluded.order_date,
                delivery_date = excluded.delivery_date,
                item_price = excluded.item_price,
                shipping_fee = excluded.shipping_fee,
                quantity = excluded.quantity,
                status = excluded.status",
        )
        .bind(&order.id.0)
        .bind(&order.merchant_id)
        .bind(&order.customer_email_masked)
        .bind(contact_email.trim().to_ascii_lowercase())
        .bind(&order.customer_phone_last4)
        .bind(&order.item_id.0)
        .bind(&order.item_category)
        .bind(order.order_date.to_string())
        .bind(order.delivery_date.map(|date| date.to_string()))
        .bind(order.item_price.to_string())
        .bind(order.shipping_fee.to_string())
        .bind(i64::from(order.quantity))
        .bind(order.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn order_from_row(row: SqliteRow) -> Result<Order, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = OrderStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown order status `{status_raw}`")))?;

    Ok(Order {
        id: OrderId(row.try_get("id")?),
        merchant_id: row.try_get("merchant_id")?,
        customer_email_masked: row.try_get("customer_email_masked")?,
        customer_phone_last4: row.try_get("customer_phone_last4")?,
        item_id: ItemId(row.try_get("item_id")?),
        item_category: row.try_get("item_category")?,
        order_date: parse_date("order_date", row.try_get("order_date")?)?,
        delivery_date: row
            .try_get::<Option<String>, _>("delivery_date")?
            .map(|value| parse_date("delivery_date", value))
            .transpose()?,
        item_price: parse_decimal("item_price", row.try_get("item_price")?)?,
        shipping_fee: parse_decimal("shipping_fee", row.try_get("shipping_fee")?)?,
        quantity: parse_u32("quantity", row.try_get("quantity")?)?,
        status,
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    value
        .parse::<Decimal>()
        .map_err(|error| RepositoryError::Decode(format!("invalid decimal in `{column}`: {error}")))
}

fn parse_date(column: &str, value: String) -> Result<NaiveDate, RepositoryError> {
    value.parse::<NaiveDate>().map_err(|error| {
        RepositoryError::Decode(format!("invalid date in `{column}`: `{value}` ({error})"))
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use caseflow_core::domain::order::{ItemId, Order, OrderId, OrderStatus};

    use super::SqlOrderRepository;
    use crate::migrations;
    use crate::repositories::OrderRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
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

    #[tokio::test]
    async fn sql_order_repo_round_trip_preserves_money_and_dates() {
        let pool = setup_pool().await;
        let repo = SqlOrderRepository::new(pool.clone());
        let order = order_fixture();

        repo.save(order.clone(), "alice@example.com").await.expect("save order");
        let found = repo.find_by_id(&order.id).await.expect("find order");

        assert_eq!(found, Some(order));
        pool.close().await;
    }

    #[tokio::test]
    async fn email_lookup_is_case_insensitive() {
        let pool = setup_pool().await;
        let repo = SqlOrderRepository::new(pool.clone());

        repo.save(order_fixture(), "Alice@Example.COM").await.expect("save order");

        let found = repo.find_by_email("alice@example.com").await.expect("find by email");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id.0, "ORD-1001");

        let missing = repo.find_by_email("nobody@example.com").await.expect("miss");
        assert!(missing.is_empty());
        pool.close().await;
    }

    #[tokio::test]
    async fn undelivered_order_round_trips_with_null_delivery_date() {
        let pool = setup_pool().await;
        let repo = SqlOrderRepository::new(pool.clone());
        let order = Order {
            delivery_date: None,
            status: OrderStatus::Processing,
            ..order_fixture()
        };

        repo.save(order.clone(), "alice@example.com").await.expect("save order");
        let found = repo.find_by_id(&order.id).await.expect("find order");

        assert_eq!(found, Some(order));
        pool.close().await;
    }
}

use crate::DbPool;

const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS orders (
        id TEXT PRIMARY KEY,
        merchant_id TEXT NOT NULL,
        customer_email_masked TEXT NOT NULL,
        customer_email_lookup TEXT NOT NULL,
        customer_phone_last4 TEXT NOT NULL,
        item_id TEXT NOT NULL,
        item_category TEXT NOT NULL,
        order_date TEXT NOT NULL,
        delivery_date TEXT,
        item_price TEXT NOT NULL,
        shipping_fee TEXT NOT NULL,
        quantity INTEGER NOT NULL,
        status TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_orders_email_lookup ON orders (customer_email_lookup)",
    "CREATE INDEX IF NOT EXISTS idx_orders_phone_last4 ON orders (customer_phone_last4)",
    "CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        stage TEXT NOT NULL,
        slots_json TEXT NOT NULL,
        trust TEXT NOT NULL,
        identity_attempts INTEGER NOT NULL,
        damage_claim_count INTEGER NOT NULL,
        open INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS tool_calls (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        tool TEXT NOT NULL,
        input_json TEXT NOT NULL,
        output_json TEXT,
        error TEXT,
        idempotency_key TEXT,
        status TEXT NOT NULL,
        latency_ms INTEGER NOT NULL,
        occurred_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_tool_calls_session_id ON tool_calls (session_id)",
    "CREATE TABLE IF NOT EXISTS idempotency_ledger (
        operation_key TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        tool TEXT NOT NULL,
        payload_hash TEXT NOT NULL,
        result_json TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS return_authorizations (
        rma_id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        order_id TEXT NOT NULL,
        item_id TEXT NOT NULL,
        issue TEXT NOT NULL,
        quantity INTEGER NOT NULL,
        refund_amount TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_return_authorizations_order_id
        ON return_authorizations (order_id)",
    "CREATE TABLE IF NOT EXISTS shipping_labels (
        label_id TEXT PRIMARY KEY,
        rma_id TEXT NOT NULL,
        carrier TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS escalation_tickets (
        ticket_id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        order_id TEXT,
        reason TEXT NOT NULL,
        summary TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
];

/// Schema changes ship as idempotent statements executed in order; re-running
/// against an existing database is a no-op.
pub async fn run_pending(pool: &DbPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::connect_with_settings;

    const BASELINE_TABLES: &[&str] = &[
        "orders",
        "sessions",
        "tool_calls",
        "idempotency_ledger",
        "return_authorizations",
        "shipping_labels",
        "escalation_tickets",
    ];

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in BASELINE_TABLES {
            let count = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .expect("check table")
            .get::<i64, _>("count");

            assert_eq!(count, 1, "table `{table}` should exist");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("first run");
        run_pending(&pool).await.expect("second run");
    }
}

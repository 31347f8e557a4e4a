use sqlx::{sqlite::SqliteRow, Row};

use caseflow_core::domain::session::SessionId;
use caseflow_core::domain::tooling::{
    IdempotencyRecord, OperationKey, ToolCallRecord, ToolCallStatus, ToolName,
};

use super::session::parse_timestamp;
use super::{IdempotencyRepository, RepositoryError, ToolCallRepository};
use crate::DbPool;

pub struct SqlToolCallRepository {
    pool: DbPool,
}

impl SqlToolCallRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ToolCallRepository for SqlToolCallRepository {
    async fn append(&self, record: ToolCallRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO tool_calls (
                id,
                session_id,
                tool,
                input_json,
                output_json,
                error,
                idempotency_key,
                status,
                latency_ms,
                occurred_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.session_id.0)
        .bind(record.tool.as_str())
        .bind(&record.input_json)
        .bind(record.output_json.as_deref())
        .bind(record.error.as_deref())
        .bind(record.idempotency_key.as_ref().map(|key| key.0.as_str()))
        .bind(record.status.as_str())
        .bind(record.latency_ms as i64)
        .bind(record.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ToolCallRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                session_id,
                tool,
                input_json,
                output_json,
                error,
                idempotency_key,
                status,
                latency_ms,
                occurred_at
             FROM tool_calls
             WHERE session_id = ?
             ORDER BY occurred_at ASC, id ASC",
        )
        .bind(&session_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(tool_call_from_row).collect()
    }
}

pub struct SqlIdempotencyRepository {
    pool: DbPool,
}

impl SqlIdempotencyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl IdempotencyRepository for SqlIdempotencyRepository {
    async fn find_operation(
        &self,
        operation_key: &OperationKey,
    ) -> Result<Option<IdempotencyRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                operation_key,
                session_id,
                tool,
                payload_hash,
                result_json,
                created_at
             FROM idempotency_ledger
             WHERE operation_key = ?",
        )
        .bind(&operation_key.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(idempotency_from_row).transpose()
    }

    async fn save_operation(&self, record: IdempotencyRecord) -> Result<(), RepositoryError> {
        // First writer wins; a replay must observe the original result.
        sqlx::query(
            "INSERT INTO idempotency_ledger (
                operation_key,
                session_id,
                tool,
                payload_hash,
                result_json,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(operation_key) DO NOTHING",
        )
        .bind(&record.operation_key.0)
        .bind(&record.session_id.0)
        .bind(record.tool.as_str())
        .bind(&record.payload_hash)
        .bind(&record.result_json)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn tool_call_from_row(row: SqliteRow) -> Result<ToolCallRecord, RepositoryError> {
    let tool = parse_tool(row.try_get::<String, _>("tool")?)?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = ToolCallStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown tool call status `{status_raw}`"))
    })?;

    let latency = row.try_get::<i64, _>("latency_ms")?;

    Ok(ToolCallRecord {
        id: row.try_get("id")?,
        session_id: SessionId(row.try_get("session_id")?),
        tool,
        input_json: row.try_get("input_json")?,
        output_json: row.try_get("output_json")?,
        error: row.try_get("error")?,
        idempotency_key: row.try_get::<Option<String>, _>("idempotency_key")?.map(OperationKey),
        status,
        latency_ms: u64::try_from(latency).map_err(|_| {
            RepositoryError::Decode(format!("negative latency_ms value: {latency}"))
        })?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

fn idempotency_from_row(row: SqliteRow) -> Result<IdempotencyRecord, RepositoryError> {
    Ok(IdempotencyRecord {
        operation_key: OperationKey(row.try_get("operation_key")?),
        session_id: SessionId(row.try_get("session_id")?),
        tool: parse_tool(row.try_get::<String, _>("tool")?)?,
        payload_hash: row.try_get("payload_hash")?,
        result_json: row.try_get("result_json")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn parse_tool(raw: String) -> Result<ToolName, RepositoryError> {
    ToolName::parse(&raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown tool name `{raw}`")))
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use caseflow_core::domain::session::SessionId;
    use caseflow_core::domain::tooling::{
        payload_hash, IdempotencyRecord, OperationKey, ToolCallRecord, ToolCallStatus, ToolName,
    };
    use caseflow_core::flows::Stage;

    use super::{SqlIdempotencyRepository, SqlToolCallRepository};
    use crate::migrations;
    use crate::repositories::{IdempotencyRepository, ToolCallRepository};
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    #[tokio::test]
    async fn tool_call_log_round_trips_in_order() {
        let pool = setup_pool().await;
        let repo = SqlToolCallRepository::new(pool.clone());
        let session_id = SessionId("S-T-1".to_string());

        let first = ToolCallRecord {
            id: "call-1".to_string(),
            session_id: session_id.clone(),
            tool: ToolName::LookupOrder,
            input_json: "{\"order_id\":\"ORD-1001\"}".to_string(),
            output_json: Some("{\"found\":true}".to_string()),
            error: None,
            idempotency_key: None,
            status: ToolCallStatus::Ok,
            latency_ms: 12,
            occurred_at: parse_ts("2026-02-23T12:00:00Z"),
        };
        let second = ToolCallRecord {
            id: "call-2".to_string(),
            tool: ToolName::CheckEligibility,
            input_json: "{}".to_string(),
            output_json: None,
            error: Some("transient".to_string()),
            status: ToolCallStatus::Error,
            latency_ms: 80,
            occurred_at: parse_ts("2026-02-23T12:00:05Z"),
            ..first.clone()
        };

        repo.append(first.clone()).await.expect("append first");
        repo.append(second.clone()).await.expect("append second");

        let calls = repo.list_for_session(&session_id).await.expect("list calls");
        assert_eq!(calls, vec![first, second]);
        pool.close().await;
    }

    #[tokio::test]
    async fn idempotency_ledger_keeps_first_result_on_replay() {
        let pool = setup_pool().await;
        let repo = SqlIdempotencyRepository::new(pool.clone());

        let session_id = SessionId("S-T-2".to_string());
        let key = OperationKey::derive(&session_id, &Stage::Confirming, 1);
        let original = IdempotencyRecord {
            operation_key: key.clone(),
            session_id: session_id.clone(),
            tool: ToolName::CreateReturn,
            payload_hash: payload_hash("{\"order_id\":\"ORD-1001\"}"),
            result_json: "{\"rma_id\":\"RMA-AAAA00000001\"}".to_string(),
            created_at: parse_ts("2026-02-23T12:00:00Z"),
        };

        repo.save_operation(original.clone()).await.expect("save operation");

        let replay = IdempotencyRecord {
            result_json: "{\"rma_id\":\"RMA-DIFFERENT\"}".to_string(),
            created_at: parse_ts("2026-02-23T12:00:30Z"),
            ..original.clone()
        };
        repo.save_operation(replay).await.expect("replay save is a no-op");

        let found = repo.find_operation(&key).await.expect("find operation");
        assert_eq!(found, Some(original));
        pool.close().await;
    }
}

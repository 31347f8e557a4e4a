use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use caseflow_core::domain::session::{Session, SessionId, SlotMap, TrustLevel};
use caseflow_core::flows::Stage;

use super::order::parse_u32;
use super::{RepositoryError, SessionRepository};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                stage,
                slots_json,
                trust,
                identity_attempts,
                damage_claim_count,
                open,
                created_at,
                updated_at
             FROM sessions
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row).transpose()
    }

    async fn save(&self, session: Session) -> Result<(), RepositoryError> {
        let slots_json = serde_json::to_string(&session.slots)
            .map_err(|error| RepositoryError::Decode(format!("encode slots: {error}")))?;

        sqlx::query(
            "INSERT INTO sessions (
                id,
                stage,
                slots_json,
                trust,
                identity_attempts,
                damage_claim_count,
                open,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                stage = excluded.stage,
                slots_json = excluded.slots_json,
                trust = excluded.trust,
                identity_attempts = excluded.identity_attempts,
                damage_claim_count = excluded.damage_claim_count,
                open = excluded.open,
                updated_at = excluded.updated_at",
        )
        .bind(&session.id.0)
        .bind(session.stage.as_str())
        .bind(slots_json)
        .bind(trust_to_str(session.trust))
        .bind(i64::from(session.identity_attempts))
        .bind(i64::from(session.damage_claim_count))
        .bind(i64::from(session.open))
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn session_from_row(row: SqliteRow) -> Result<Session, RepositoryError> {
    let stage_raw = row.try_get::<String, _>("stage")?;
    let stage = Stage::parse(&stage_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown session stage `{stage_raw}`")))?;

    let slots_raw = row.try_get::<String, _>("slots_json")?;
    let slots: SlotMap = serde_json::from_str(&slots_raw)
        .map_err(|error| RepositoryError::Decode(format!("decode slots: {error}")))?;

    let trust_raw = row.try_get::<String, _>("trust")?;
    let trust = trust_from_str(&trust_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown trust level `{trust_raw}`")))?;

    Ok(Session {
        id: SessionId(row.try_get("id")?),
        stage,
        slots,
        trust,
        identity_attempts: parse_u32("identity_attempts", row.try_get("identity_attempts")?)?,
        damage_claim_count: parse_u32("damage_claim_count", row.try_get("damage_claim_count")?)?,
        open: row.try_get::<i64, _>("open")? != 0,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn trust_to_str(trust: TrustLevel) -> &'static str {
    match trust {
        TrustLevel::Standard => "standard",
        TrustLevel::Restricted => "restricted",
    }
}

fn trust_from_str(value: &str) -> Option<TrustLevel> {
    match value {
        "standard" => Some(TrustLevel::Standard),
        "restricted" => Some(TrustLevel::Restricted),
        _ => None,
    }
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

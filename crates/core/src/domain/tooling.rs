use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::session::SessionId;
use crate::flows::states::Stage;

/// Fixed allowlist of tool operations. Nothing outside this enum can be
/// invoked through the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    LookupOrder,
    GetPolicy,
    CheckEligibility,
    ComputeRefund,
    CreateReturn,
    CreateLabel,
    CreateEscalation,
}

impl ToolName {
    pub const ALL: [ToolName; 7] = [
        Self::LookupOrder,
        Self::GetPolicy,
        Self::CheckEligibility,
        Self::ComputeRefund,
        Self::CreateReturn,
        Self::CreateLabel,
        Self::CreateEscalation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LookupOrder => "lookup_order",
            Self::GetPolicy => "get_policy",
            Self::CheckEligibility => "check_eligibility",
            Self::ComputeRefund => "compute_refund",
            Self::CreateReturn => "create_return",
            Self::CreateLabel => "create_label",
            Self::CreateEscalation => "create_escalation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lookup_order" => Some(Self::LookupOrder),
            "get_policy" => Some(Self::GetPolicy),
            "check_eligibility" => Some(Self::CheckEligibility),
            "compute_refund" => Some(Self::ComputeRefund),
            "create_return" => Some(Self::CreateReturn),
            "create_label" => Some(Self::CreateLabel),
            "create_escalation" => Some(Self::CreateEscalation),
            _ => None,
        }
    }

    /// Side-effecting operations require a caller-supplied idempotency key;
    /// read-only operations are safe to retry without one.
    pub fn is_side_effecting(&self) -> bool {
        matches!(self, Self::CreateReturn | Self::CreateLabel | Self::CreateEscalation)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKey(pub String);

impl OperationKey {
    /// Derive the key deterministically from (session, stage, attempt) so a
    /// replayed turn produces the same key and hits the stored result.
    pub fn derive(session: &SessionId, stage: &Stage, attempt: u32) -> Self {
        Self(format!("{}:{}:{}", session.0, stage.as_str(), attempt))
    }

    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        let digest = hasher.finalize();
        hex_prefix(&digest, 12).to_uppercase()
    }
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
        if out.len() >= chars {
            break;
        }
    }
    out.truncate(chars);
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Ok,
    Error,
    Skipped,
}

impl ToolCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ok" => Some(Self::Ok),
            "error" => Some(Self::Error),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Append-only record of a single tool invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub session_id: SessionId,
    pub tool: ToolName,
    pub input_json: String,
    pub output_json: Option<String>,
    pub error: Option<String>,
    pub idempotency_key: Option<OperationKey>,
    pub status: ToolCallStatus,
    pub latency_ms: u64,
    pub occurred_at: DateTime<Utc>,
}

/// One record per operation key. Replays return `result_json` without
/// re-executing the side effect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub operation_key: OperationKey,
    pub session_id: SessionId,
    pub tool: ToolName,
    pub payload_hash: String,
    pub result_json: String,
    pub created_at: DateTime<Utc>,
}

pub fn payload_hash(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use crate::domain::session::SessionId;
    use crate::flows::states::Stage;

    use super::{OperationKey, ToolName};

    #[test]
    fn tool_name_round_trips_from_wire_encoding() {
        for tool in ToolName::ALL {
            assert_eq!(ToolName::parse(tool.as_str()), Some(tool));
        }
        assert_eq!(ToolName::parse("drop_table"), None);
    }

    #[test]
    fn write_tools_are_flagged_side_effecting() {
        assert!(ToolName::CreateReturn.is_side_effecting());
        assert!(ToolName::CreateEscalation.is_side_effecting());
        assert!(!ToolName::LookupOrder.is_side_effecting());
        assert!(!ToolName::ComputeRefund.is_side_effecting());
    }

    #[test]
    fn operation_key_derivation_is_deterministic() {
        let session = SessionId("S-1".to_string());
        let first = OperationKey::derive(&session, &Stage::Confirming, 1);
        let second = OperationKey::derive(&session, &Stage::Confirming, 1);
        let third = OperationKey::derive(&session, &Stage::Confirming, 2);

        assert_eq!(first, second);
        assert_ne!(first, third);
        assert_eq!(first.digest(), second.digest());
        assert_eq!(first.digest().len(), 12);
    }
}

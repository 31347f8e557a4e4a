use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use caseflow_core::domain::case::{CaseFacts, IssueCategory};
use caseflow_core::domain::fulfillment::{
    escalation_id, label_id, rma_id, EscalationTicket, ReturnAuthorization, ShippingLabel,
};
use caseflow_core::domain::order::{ItemId, Order, OrderId, OrderIdentifier};
use caseflow_core::domain::session::SessionId;
use caseflow_core::domain::tooling::{
    payload_hash, IdempotencyRecord, OperationKey, ToolCallRecord, ToolCallStatus, ToolName,
};
use caseflow_core::policy::{PayoutBreakdown, PolicyDecision, PolicyEngine, RefundType, ReturnPolicy};
use caseflow_db::repositories::{
    FulfillmentRepository, IdempotencyRepository, OrderRepository, RepositoryError,
    ToolCallRepository,
};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid tool input: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transient tool failure: {0}")]
    Transient(String),
    #[error("permanent tool failure: {0}")]
    Permanent(String),
}

impl ToolError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<RepositoryError> for ToolError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(inner) => Self::Transient(inner.to_string()),
            RepositoryError::Decode(message) => Self::Permanent(message),
        }
    }
}

/// One request into the registry. Side-effecting tools must carry an
/// operation key; read-only tools must not.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub session_id: SessionId,
    pub tool: ToolName,
    pub input: serde_json::Value,
    pub operation_key: Option<OperationKey>,
}

// Request schemas. Unknown fields are rejected, not ignored: a misspelled
// field silently dropped would change tool semantics.

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookupOrderRequest {
    pub identifier: OrderIdentifier,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LookupOrderResponse {
    pub matches: Vec<Order>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetPolicyRequest {
    pub item_category: String,
    pub issue: IssueCategory,
    pub delivered: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckEligibilityRequest {
    pub facts: CaseFacts,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComputeRefundRequest {
    pub facts: CaseFacts,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefundQuote {
    pub payout: Decimal,
    pub breakdown: PayoutBreakdown,
    pub refund_type: RefundType,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateReturnRequest {
    pub order_id: OrderId,
    pub item_id: ItemId,
    pub issue: IssueCategory,
    pub quantity: u32,
    pub refund_amount: Decimal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateLabelRequest {
    pub rma_id: String,
    pub carrier: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateEscalationRequest {
    pub order_id: Option<OrderId>,
    pub reason: String,
    pub summary: String,
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(50) }
    }
}

/// Allowlisted tool registry. Every invocation is validated against its
/// schema, recorded in the append-only call log, and, for side-effecting
/// tools, checked against the idempotency ledger before executing.
pub struct ToolRegistry {
    orders: Arc<dyn OrderRepository>,
    fulfillment: Arc<dyn FulfillmentRepository>,
    idempotency: Arc<dyn IdempotencyRepository>,
    call_log: Arc<dyn ToolCallRepository>,
    policy: PolicyEngine,
    retry: RetryPolicy,
}

impl ToolRegistry {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        fulfillment: Arc<dyn FulfillmentRepository>,
        idempotency: Arc<dyn IdempotencyRepository>,
        call_log: Arc<dyn ToolCallRepository>,
    ) -> Self {
        Self {
            orders,
            fulfillment,
            idempotency,
            call_log,
            policy: PolicyEngine::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Execute one invocation end to end: schema check, idempotency check,
    /// bounded retry on transient failures, call-log append.
    pub async fn dispatch(
        &self,
        invocation: ToolInvocation,
    ) -> Result<serde_json::Value, ToolError> {
        let started = Instant::now();

        if invocation.tool.is_side_effecting() && invocation.operation_key.is_none() {
            return Err(ToolError::Validation(format!(
                "{} requires an operation key",
                invocation.tool.as_str()
            )));
        }
        if !invocation.tool.is_side_effecting() && invocation.operation_key.is_some() {
            return Err(ToolError::Validation(format!(
                "{} is read-only and takes no operation key",
                invocation.tool.as_str()
            )));
        }

        // Replay check before execution. A stored operation returns its
        // original result; the side effect never runs twice.
        if let Some(key) = &invocation.operation_key {
            if let Some(stored) = self.idempotency.find_operation(key).await? {
                let incoming_hash = payload_hash(&invocation.input.to_string());
                if stored.payload_hash != incoming_hash {
                    return Err(ToolError::Validation(format!(
                        "operation key {} reused with a different payload",
                        key.0
                    )));
                }
                debug!(tool = invocation.tool.as_str(), key = %key.0, "idempotent replay");
                let result: serde_json::Value = serde_json::from_str(&stored.result_json)
                    .map_err(|error| ToolError::Permanent(error.to_string()))?;
                self.record(&invocation, Ok(&result), ToolCallStatus::Skipped, started).await;
                return Ok(result);
            }
        }

        let mut attempt = 0u32;
        let result = loop {
            match self.execute(&invocation).await {
                Ok(value) => break Ok(value),
                Err(error) if error.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    warn!(
                        tool = invocation.tool.as_str(),
                        attempt,
                        error = %error,
                        "transient tool failure, retrying"
                    );
                    tokio::time::sleep(self.retry.base_delay * 2u32.pow(attempt - 1)).await;
                }
                Err(error) => break Err(error),
            }
        };

        match result {
            Ok(value) => {
                if let Some(key) = &invocation.operation_key {
                    self.idempotency
                        .save_operation(IdempotencyRecord {
                            operation_key: key.clone(),
                            session_id: invocation.session_id.clone(),
                            tool: invocation.tool,
                            payload_hash: payload_hash(&invocation.input.to_string()),
                            result_json: value.to_string(),
                            created_at: Utc::now(),
                        })
                        .await?;
                }
                self.record(&invocation, Ok(&value), ToolCallStatus::Ok, started).await;
                Ok(value)
            }
            Err(error) => {
                self.record(&invocation, Err(&error), ToolCallStatus::Error, started).await;
                Err(error)
            }
        }
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<serde_json::Value, ToolError> {
        match invocation.tool {
            ToolName::LookupOrder => {
                let request: LookupOrderRequest = decode(&invocation.input)?;
                request
                    .identifier
                    .validate()
                    .map_err(|error| ToolError::Validation(error.to_string()))?;
                let matches = self.orders.resolve(&request.identifier).await?;
                encode(&LookupOrderResponse { matches })
            }
            ToolName::GetPolicy => {
                let request: GetPolicyRequest = decode(&invocation.input)?;
                let policy: ReturnPolicy =
                    self.policy.policy_for(&request.item_category, request.issue, request.delivered);
                encode(&policy)
            }
            ToolName::CheckEligibility => {
                let request: CheckEligibilityRequest = decode(&invocation.input)?;
                validate_facts(&request.facts)?;
                let decision: PolicyDecision = self.policy.decide(&request.facts);
                encode(&decision)
            }
            ToolName::ComputeRefund => {
                let request: ComputeRefundRequest = decode(&invocation.input)?;
                validate_facts(&request.facts)?;
                let decision = self.policy.decide(&request.facts);
                encode(&RefundQuote {
                    payout: decision.payout,
                    breakdown: decision.breakdown,
                    refund_type: decision.refund_type,
                })
            }
            ToolName::CreateReturn => {
                let request: CreateReturnRequest = decode(&invocation.input)?;
                if request.quantity == 0 {
                    return Err(ToolError::Validation("quantity must be at least 1".into()));
                }
                if request.refund_amount < Decimal::ZERO {
                    return Err(ToolError::Validation("refund amount cannot be negative".into()));
                }
                let key = required_key(invocation)?;
                let rma = ReturnAuthorization {
                    rma_id: rma_id(key),
                    session_id: invocation.session_id.clone(),
                    order_id: request.order_id,
                    item_id: request.item_id,
                    issue: request.issue,
                    quantity: request.quantity,
                    refund_amount: request.refund_amount,
                    created_at: Utc::now(),
                };
                self.fulfillment.save_return(rma.clone()).await?;
                encode(&rma)
            }
            ToolName::CreateLabel => {
                let request: CreateLabelRequest = decode(&invocation.input)?;
                if self.fulfillment.find_return(&request.rma_id).await?.is_none() {
                    return Err(ToolError::NotFound(format!(
                        "no return authorization {}",
                        request.rma_id
                    )));
                }
                let key = required_key(invocation)?;
                let label = ShippingLabel {
                    label_id: label_id(key),
                    rma_id: request.rma_id,
                    carrier: request.carrier,
                    created_at: Utc::now(),
                };
                self.fulfillment.save_label(label.clone()).await?;
                encode(&label)
            }
            ToolName::CreateEscalation => {
                let request: CreateEscalationRequest = decode(&invocation.input)?;
                if request.reason.trim().is_empty() {
                    return Err(ToolError::Validation("escalation reason is required".into()));
                }
                let key = required_key(invocation)?;
                let ticket = EscalationTicket {
                    ticket_id: escalation_id(key),
                    session_id: invocation.session_id.clone(),
                    order_id: request.order_id,
                    reason: request.reason,
                    summary: request.summary,
                    created_at: Utc::now(),
                };
                self.fulfillment.save_escalation(ticket.clone()).await?;
                encode(&ticket)
            }
        }
    }

    async fn record(
        &self,
        invocation: &ToolInvocation,
        result: Result<&serde_json::Value, &ToolError>,
        status: ToolCallStatus,
        started: Instant,
    ) {
        let record = ToolCallRecord {
            id: Uuid::new_v4().to_string(),
            session_id: invocation.session_id.clone(),
            tool: invocation.tool,
            input_json: invocation.input.to_string(),
            output_json: result.ok().map(|value| value.to_string()),
            error: result.err().map(|error| error.to_string()),
            idempotency_key: invocation.operation_key.clone(),
            status,
            latency_ms: started.elapsed().as_millis() as u64,
            occurred_at: Utc::now(),
        };

        // The call log is observability, not control flow: a failed append
        // must not fail the tool call itself.
        if let Err(error) = self.call_log.append(record).await {
            warn!(error = %error, "failed to append tool call record");
        }
    }
}

fn required_key(invocation: &ToolInvocation) -> Result<&OperationKey, ToolError> {
    invocation.operation_key.as_ref().ok_or_else(|| {
        ToolError::Validation(format!("{} requires an operation key", invocation.tool.as_str()))
    })
}

fn decode<T: serde::de::DeserializeOwned>(input: &serde_json::Value) -> Result<T, ToolError> {
    serde_json::from_value(input.clone()).map_err(|error| ToolError::Validation(error.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value, ToolError> {
    serde_json::to_value(value).map_err(|error| ToolError::Permanent(error.to_string()))
}

fn validate_facts(facts: &CaseFacts) -> Result<(), ToolError> {
    if facts.quantity_ordered == 0 {
        return Err(ToolError::Validation("quantity ordered must be at least 1".into()));
    }
    if facts.quantity_affected > facts.quantity_ordered {
        return Err(ToolError::Validation(
            "quantity affected cannot exceed quantity ordered".into(),
        ));
    }
    if facts.item_price < Decimal::ZERO || facts.shipping_fee < Decimal::ZERO {
        return Err(ToolError::Validation("amounts cannot be negative".into()));
    }
    Ok(())
}

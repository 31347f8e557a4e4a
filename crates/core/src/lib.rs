pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod policy;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use config::{
    AdvisorMode, AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat,
    StrictFailurePolicy,
};
pub use domain::case::{
    Case, CaseFacts, CaseId, EvidenceRecord, EvidenceStatus, IssueCategory, Resolution,
};
pub use domain::fulfillment::{EscalationTicket, ReturnAuthorization, ShippingLabel};
pub use domain::order::{mask_email, ItemId, Order, OrderId, OrderIdentifier, OrderStatus};
pub use domain::session::{Session, SessionId, SlotKey, SlotMap, SlotState, TrustLevel};
pub use domain::tooling::{
    payload_hash, IdempotencyRecord, OperationKey, ToolCallRecord, ToolCallStatus, ToolName,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{
    FlowDefinition, FlowEngine, FlowTransitionError, SessionAction, SessionEvent, Stage,
    StageContext, SupportFlow, TransitionOutcome,
};
pub use policy::{
    PayoutBreakdown, PolicyConstraint, PolicyDecision, PolicyEngine, ReasonCode, RefundType,
    ReturnPolicy,
};

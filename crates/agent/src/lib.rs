//! Conversation orchestration for the returns and refunds agent.
//!
//! The agent runs a constrained per-turn loop:
//! 1. **Guardrails** (`guardrails`) - screen raw customer text before anything
//!    else sees it, and scrub outbound replies.
//! 2. **Intent extraction** (`intent`) - parse the turn into slot candidates
//!    and session events.
//! 3. **Tool execution** (`tools`) - call the allowlisted tool registry with
//!    schema-checked inputs and idempotent side effects.
//! 4. **Policy** - the deterministic policy engine decides eligibility and
//!    payout; the advisor never overrides it.
//!
//! # Safety Principle
//!
//! The language-model advisor (`advisor`) is strictly a suggester. It never
//! decides eligibility, payout amounts, or state transitions. Those are
//! deterministic decisions made by the policy engine and the stage machine.

pub mod advisor;
pub mod evidence;
pub mod guardrails;
pub mod intent;
pub mod orchestrator;
pub mod tools;

use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::session::SlotKey;
use crate::flows::states::{SessionAction, SessionEvent, Stage, StageContext, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_stage(&self) -> Stage;
    fn transition(
        &self,
        current: &Stage,
        event: &SessionEvent,
        context: &StageContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// The refund/return support flow: identify the order, select the item,
/// classify the issue, collect evidence for damage claims, decide under
/// policy, confirm with the customer, then resolve or escalate.
#[derive(Clone, Debug, Default)]
pub struct SupportFlow;

impl FlowDefinition for SupportFlow {
    fn initial_stage(&self) -> Stage {
        Stage::Identifying
    }

    fn transition(
        &self,
        current: &Stage,
        event: &SessionEvent,
        context: &StageContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_support(current, event, context)
    }
}

pub struct FlowEngine<F = SupportFlow> {
    flow: F,
}

impl Default for FlowEngine<SupportFlow> {
    fn default() -> Self {
        Self::new(SupportFlow)
    }
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_stage(&self) -> Stage {
        self.flow.initial_stage()
    }

    pub fn apply(
        &self,
        current: &Stage,
        event: &SessionEvent,
        context: &StageContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &Stage,
        event: &SessionEvent,
        context: &StageContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.session_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.session_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("stage", current.as_str())
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required slots before leaving {stage:?}: {missing:?}")]
    MissingRequiredSlots { stage: Stage, missing: Vec<SlotKey> },
    #[error("invalid transition from {stage:?} using event {event:?}")]
    InvalidTransition { stage: Stage, event: SessionEvent },
    #[error("identity retry budget not exhausted: {attempts} of {budget} attempts used")]
    RetryBudgetNotExhausted { attempts: u32, budget: u32 },
    #[error("evidence has not been validated for this claim")]
    EvidenceNotValidated,
}

fn transition_support(
    current: &Stage,
    event: &SessionEvent,
    context: &StageContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use SessionAction::{
        CloseSession, CreateEscalation, ExecuteResolution, InvokePolicy, ListOrderItems,
        PresentResolution, RequestClarification, RequestEvidence,
    };
    use SessionEvent::{
        CorrectionRequested, DecisionReached, EscalationRequested, EvidenceAccepted,
        EvidenceCorrectionRequested, IdentityRetryExhausted, IssueClassified, ItemSelected,
        OrderResolved, ResolutionAccepted, ResolutionDeclined,
    };
    use Stage::{
        Classifying, CollectingEvidence, Confirming, Deciding, Escalated, Identifying, Resolved,
        Selecting,
    };

    if current.is_terminal() {
        return Err(FlowTransitionError::InvalidTransition {
            stage: current.clone(),
            event: event.clone(),
        });
    }

    let require_slots = || -> Result<(), FlowTransitionError> {
        if context.missing_slots.is_empty() {
            Ok(())
        } else {
            Err(FlowTransitionError::MissingRequiredSlots {
                stage: current.clone(),
                missing: context.missing_slots.clone(),
            })
        }
    };

    let (to, actions) = match (current, event) {
        (Identifying, OrderResolved) => {
            require_slots()?;
            (Selecting, vec![ListOrderItems])
        }
        (Identifying, IdentityRetryExhausted) => {
            if context.identity_attempts < context.identity_retry_budget {
                return Err(FlowTransitionError::RetryBudgetNotExhausted {
                    attempts: context.identity_attempts,
                    budget: context.identity_retry_budget,
                });
            }
            (Escalated, vec![CreateEscalation, CloseSession])
        }
        (Selecting, ItemSelected) => {
            require_slots()?;
            (Classifying, vec![RequestClarification])
        }
        (Classifying, IssueClassified { needs_evidence }) => {
            require_slots()?;
            if *needs_evidence {
                (CollectingEvidence, vec![RequestEvidence])
            } else {
                (Deciding, vec![InvokePolicy])
            }
        }
        (CollectingEvidence, EvidenceAccepted) => {
            if !context.evidence_validated {
                return Err(FlowTransitionError::EvidenceNotValidated);
            }
            (Deciding, vec![InvokePolicy])
        }
        (Deciding, DecisionReached) => (Confirming, vec![PresentResolution]),
        (Confirming, ResolutionAccepted) => (Resolved, vec![ExecuteResolution, CloseSession]),
        (Confirming, ResolutionDeclined) => (Escalated, vec![CreateEscalation, CloseSession]),
        // Explicit correction paths: re-open classification or evidence
        // collection without touching earlier identity work.
        (CollectingEvidence | Deciding | Confirming, CorrectionRequested) => {
            (Classifying, vec![RequestClarification])
        }
        (Deciding | Confirming, EvidenceCorrectionRequested) => {
            (CollectingEvidence, vec![RequestEvidence])
        }
        (_, EscalationRequested) => (Escalated, vec![CreateEscalation, CloseSession]),
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                stage: current.clone(),
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::session::SessionId;
    use crate::domain::session::SlotKey;
    use crate::flows::engine::{FlowEngine, FlowTransitionError, SupportFlow};
    use crate::flows::states::{SessionAction, SessionEvent, Stage, StageContext};

    #[test]
    fn happy_path_without_evidence_reaches_resolved() {
        let engine = FlowEngine::new(SupportFlow);
        let context = StageContext::default();
        let mut stage = engine.initial_stage();

        for event in [
            SessionEvent::OrderResolved,
            SessionEvent::ItemSelected,
            SessionEvent::IssueClassified { needs_evidence: false },
            SessionEvent::DecisionReached,
            SessionEvent::ResolutionAccepted,
        ] {
            stage = engine.apply(&stage, &event, &context).expect("transition").to;
        }

        assert_eq!(stage, Stage::Resolved);
    }

    #[test]
    fn damage_claim_routes_through_evidence_collection() {
        let engine = FlowEngine::default();
        let context = StageContext { evidence_validated: true, ..StageContext::default() };

        let collecting = engine
            .apply(
                &Stage::Classifying,
                &SessionEvent::IssueClassified { needs_evidence: true },
                &context,
            )
            .expect("classifying -> collecting");
        assert_eq!(collecting.to, Stage::CollectingEvidence);
        assert!(collecting.actions.contains(&SessionAction::RequestEvidence));

        let deciding = engine
            .apply(&collecting.to, &SessionEvent::EvidenceAccepted, &context)
            .expect("collecting -> deciding");
        assert_eq!(deciding.to, Stage::Deciding);
        assert_eq!(deciding.actions, vec![SessionAction::InvokePolicy]);
    }

    #[test]
    fn unvalidated_evidence_cannot_leave_collection() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(
                &Stage::CollectingEvidence,
                &SessionEvent::EvidenceAccepted,
                &StageContext::default(),
            )
            .expect_err("guard must hold");
        assert_eq!(error, FlowTransitionError::EvidenceNotValidated);
    }

    #[test]
    fn missing_slots_keep_the_session_in_place() {
        let engine = FlowEngine::default();
        let context = StageContext {
            missing_slots: vec![SlotKey::OrderId],
            ..StageContext::default()
        };

        let error = engine
            .apply(&Stage::Identifying, &SessionEvent::OrderResolved, &context)
            .expect_err("guard must hold");
        assert!(matches!(error, FlowTransitionError::MissingRequiredSlots { .. }));
    }

    #[test]
    fn identity_retry_budget_gates_forced_escalation() {
        let engine = FlowEngine::default();
        let early = StageContext {
            identity_attempts: 1,
            identity_retry_budget: 3,
            ..StageContext::default()
        };
        let exhausted = StageContext {
            identity_attempts: 3,
            identity_retry_budget: 3,
            ..StageContext::default()
        };

        assert!(matches!(
            engine.apply(&Stage::Identifying, &SessionEvent::IdentityRetryExhausted, &early),
            Err(FlowTransitionError::RetryBudgetNotExhausted { attempts: 1, budget: 3 })
        ));

        let outcome = engine
            .apply(&Stage::Identifying, &SessionEvent::IdentityRetryExhausted, &exhausted)
            .expect("exhausted budget escalates");
        assert_eq!(outcome.to, Stage::Escalated);
        assert!(outcome.actions.contains(&SessionAction::CreateEscalation));
    }

    #[test]
    fn terminal_stages_absorb_every_event() {
        let engine = FlowEngine::default();
        let context = StageContext::default();

        for terminal in [Stage::Resolved, Stage::Escalated] {
            for event in [
                SessionEvent::OrderResolved,
                SessionEvent::CorrectionRequested,
                SessionEvent::EscalationRequested,
            ] {
                assert!(matches!(
                    engine.apply(&terminal, &event, &context),
                    Err(FlowTransitionError::InvalidTransition { .. })
                ));
            }
        }
    }

    #[test]
    fn correction_returns_to_classifying_from_confirming() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&Stage::Confirming, &SessionEvent::CorrectionRequested, &StageContext::default())
            .expect("correction allowed");
        assert_eq!(outcome.to, Stage::Classifying);
    }

    #[test]
    fn replay_is_deterministic_for_same_event_sequence() {
        let engine = FlowEngine::default();
        let context = StageContext { evidence_validated: true, ..StageContext::default() };
        let events = [
            SessionEvent::OrderResolved,
            SessionEvent::ItemSelected,
            SessionEvent::IssueClassified { needs_evidence: true },
            SessionEvent::EvidenceAccepted,
            SessionEvent::DecisionReached,
            SessionEvent::ResolutionAccepted,
        ];

        let run = || {
            let mut stage = engine.initial_stage();
            let mut actions = Vec::new();
            for event in &events {
                let outcome = engine.apply(&stage, event, &context).expect("deterministic run");
                actions.push(outcome.actions.clone());
                stage = outcome.to;
            }
            (stage, actions)
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn transitions_emit_audit_events() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();

        let _ = engine
            .apply_with_audit(
                &Stage::Identifying,
                &SessionEvent::OrderResolved,
                &StageContext::default(),
                &sink,
                &AuditContext::new(Some(SessionId("S-77".to_string())), "req-77", "flow-engine"),
            )
            .expect("transition should succeed");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "flow.transition_applied");
        assert_eq!(events[0].correlation_id, "req-77");
    }
}

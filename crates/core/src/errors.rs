use thiserror::Error;

use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("slot {slot} is already filled; use the correction path to change it")]
    SlotOverwrite { slot: &'static str },
    #[error("session {session} is closed and cannot be modified")]
    SessionClosed { session: String },
    #[error("case {case} is committed and immutable")]
    CaseCommitted { case: String },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("guardrail refused the request: {0}")]
    GuardrailRefusal(String),
}

/// Errors surfaced at the HTTP and CLI boundary. Internal detail stays in
/// `message` for the logs; customers only ever see [`InterfaceError::user_message`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("refused: {message}")]
    Refused { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "I couldn't use that information. Could you check it and try again?"
            }
            Self::Refused { .. } => {
                "I can't help with that request. I can assist with returns, refunds, and order issues."
            }
            Self::ServiceUnavailable { .. } => {
                "Something went wrong on our side. Please try again in a moment."
            }
            Self::Internal { .. } => {
                "I've hit an unexpected problem and routed your case to a human agent."
            }
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Refused { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(_) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::GuardrailRefusal(message) => {
                Self::Refused { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "missing required slot".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn bad_request_has_customer_safe_message() {
        let interface = ApplicationError::from(DomainError::SlotOverwrite { slot: "order_id" })
            .into_interface("req-2");

        assert_eq!(
            interface.user_message(),
            "I couldn't use that information. Could you check it and try again?"
        );
    }

    #[test]
    fn guardrail_refusal_maps_to_refused() {
        let interface = ApplicationError::GuardrailRefusal("prompt injection".to_owned())
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Refused { .. }));
        assert_eq!(
            interface.user_message(),
            "I can't help with that request. I can assist with returns, refunds, and order issues."
        );
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface =
            ApplicationError::Persistence("database lock timeout".to_owned()).into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("missing api key".to_owned()).into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(
            interface.user_message(),
            "I've hit an unexpected problem and routed your case to a human agent."
        );
    }
}

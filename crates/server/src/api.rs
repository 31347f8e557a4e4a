use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use caseflow_agent::orchestrator::{
    Orchestrator, ReadinessReport, ToolTrace, TurnHints, TurnRequest,
};
use caseflow_core::domain::case::Resolution;
use caseflow_core::domain::session::{SessionId, TrustLevel};
use caseflow_core::errors::{ApplicationError, InterfaceError};
use caseflow_core::flows::Stage;

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/agent/respond", post(respond))
        .route("/agent/status", get(readiness))
        .route("/agent/status/{session_id}", get(status))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    /// Omitted on the first turn; the server mints a session id and the
    /// client carries it on subsequent turns.
    pub session_id: Option<String>,
    pub text: String,
    /// Selections from guided UI controls, merged ahead of text extraction.
    #[serde(default)]
    pub hints: TurnHints,
}

#[derive(Debug, Serialize)]
pub struct RespondResponse {
    pub session_id: String,
    pub correlation_id: String,
    pub reply: String,
    pub summary: String,
    pub next_action: String,
    pub stage: Stage,
    pub open: bool,
    pub offered_resolutions: Vec<Resolution>,
    pub references: Vec<String>,
    pub tool_trace: Vec<ToolTrace>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub session_id: String,
    pub stage: Stage,
    pub open: bool,
    pub trust: TrustLevel,
    pub filled_slots: BTreeMap<String, String>,
    pub missing_slots: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub correlation_id: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

pub async fn respond(
    State(state): State<ApiState>,
    Json(request): Json<RespondRequest>,
) -> Result<Json<RespondResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();

    if request.text.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "text must not be empty".to_string(),
                correlation_id,
            }),
        ));
    }

    let session_id =
        request.session_id.unwrap_or_else(|| format!("S-{}", Uuid::new_v4().simple()));
    info!(event_name = "api.respond", session_id = %session_id, correlation_id = %correlation_id, "turn received");

    let turn = TurnRequest {
        session_id: SessionId(session_id),
        correlation_id: correlation_id.clone(),
        text: request.text,
        hints: request.hints,
    };

    let response = state
        .orchestrator
        .respond(turn)
        .await
        .map_err(|error| interface_error(error, &correlation_id))?;

    Ok(Json(RespondResponse {
        session_id: response.session_id.0,
        correlation_id: response.correlation_id,
        reply: response.reply,
        summary: response.summary,
        next_action: response.next_action,
        stage: response.stage,
        open: response.open,
        offered_resolutions: response.offered_resolutions,
        references: response.references,
        tool_trace: response.tool_trace,
    }))
}

pub async fn readiness(State(state): State<ApiState>) -> Json<ReadinessReport> {
    Json(state.orchestrator.readiness())
}

pub async fn status(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let found = state
        .orchestrator
        .status(&SessionId(session_id.clone()))
        .await
        .map_err(|error| interface_error(error, &correlation_id))?;

    let Some(status) = found else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorBody { error: format!("unknown session `{session_id}`"), correlation_id }),
        ));
    };

    Ok(Json(StatusResponse {
        session_id: status.session_id.0,
        stage: status.stage,
        open: status.open,
        trust: status.trust,
        filled_slots: status.filled_slots.into_iter().collect(),
        missing_slots: status.missing_slots,
    }))
}

fn interface_error(error: ApplicationError, correlation_id: &str) -> ApiError {
    let interface = error.into_interface(correlation_id);
    let status = match &interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Refused { .. } => StatusCode::FORBIDDEN,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorBody {
            error: interface.user_message().to_string(),
            correlation_id: correlation_id.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::Json;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use caseflow_agent::orchestrator::Orchestrator;
    use caseflow_agent::tools::ToolRegistry;
    use caseflow_core::audit::InMemoryAuditSink;
    use caseflow_core::config::AppConfig;
    use caseflow_core::domain::order::{ItemId, Order, OrderId, OrderStatus};
    use caseflow_core::flows::Stage;
    use caseflow_db::repositories::{
        InMemoryFulfillmentRepository, InMemoryIdempotencyRepository, InMemoryOrderRepository,
        InMemorySessionRepository, InMemoryToolCallRepository, OrderRepository,
    };

    use caseflow_agent::orchestrator::TurnHints;

    use super::{readiness, respond, status, ApiState, RespondRequest};

    async fn api_state() -> ApiState {
        let orders = Arc::new(InMemoryOrderRepository::default());
        let today = Utc::now().date_naive();
        orders
            .save(
                Order {
                    id: OrderId("ORD-1001".to_string()),
                    merchant_id: "M-001".to_string(),
                    customer_email_masked: "al***@example.com".to_string(),
                    customer_phone_last4: "1234".to_string(),
                    item_id: ItemId("ITEM-1".to_string()),
                    item_category: "fashion".to_string(),
                    order_date: today - Duration::days(9),
                    delivery_date: Some(today - Duration::days(5)),
                    item_price: Decimal::new(12_000, 2),
                    shipping_fee: Decimal::new(1_000, 2),
                    quantity: 1,
                    status: OrderStatus::Delivered,
                },
                "alice@example.com",
            )
            .await
            .expect("seed order");

        let fulfillment = Arc::new(InMemoryFulfillmentRepository::default());
        let registry = Arc::new(ToolRegistry::new(
            orders.clone(),
            fulfillment.clone(),
            Arc::new(InMemoryIdempotencyRepository::default()),
            Arc::new(InMemoryToolCallRepository::default()),
        ));
        let orchestrator = Orchestrator::new(
            Arc::new(InMemorySessionRepository::default()),
            orders,
            fulfillment,
            registry,
            Arc::new(InMemoryAuditSink::default()),
            None,
            &AppConfig::default(),
        )
        .expect("build orchestrator");

        ApiState { orchestrator: Arc::new(orchestrator) }
    }

    #[tokio::test]
    async fn respond_mints_a_session_and_answers() {
        let state = api_state().await;

        let Json(payload) = respond(
            State(state),
            Json(RespondRequest {
                session_id: None,
                text: "my order ORD-1001 arrived broken, refund please, photo: damage.jpg"
                    .to_string(),
                hints: TurnHints::default(),
            }),
        )
        .await
        .expect("respond");

        assert!(payload.session_id.starts_with("S-"));
        assert_eq!(payload.stage, Stage::Confirming);
        assert!(payload.open);
        assert!(!payload.reply.is_empty());
        assert!(!payload.tool_trace.is_empty());
        assert!(payload.summary.contains("ORD-1001"));
    }

    #[tokio::test]
    async fn readiness_reports_the_advisor_mode() {
        let state = api_state().await;

        let Json(report) = readiness(State(state)).await;

        assert_eq!(report.mode, "deterministic");
        assert!(report.advisor.ready);
    }

    #[tokio::test]
    async fn respond_rejects_empty_text() {
        let state = api_state().await;

        let result = respond(
            State(state),
            Json(RespondRequest {
                session_id: None,
                text: "   ".to_string(),
                hints: TurnHints::default(),
            }),
        )
        .await;

        let (status, _) = result.err().expect("empty text is rejected");
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_is_not_found_for_unknown_sessions() {
        let state = api_state().await;

        let result = status(State(state), Path("S-nope".to_string())).await;

        let (code, _) = result.err().expect("unknown session is 404");
        assert_eq!(code, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_reflects_the_conversation() {
        let state = api_state().await;

        let Json(first) = respond(
            State(state.clone()),
            Json(RespondRequest {
                session_id: None,
                text: "my order is ORD-1001".to_string(),
                hints: TurnHints::default(),
            }),
        )
        .await
        .expect("respond");

        let Json(found) = status(State(state), Path(first.session_id.clone()))
            .await
            .expect("status");

        assert_eq!(found.session_id, first.session_id);
        assert_eq!(found.stage, Stage::Classifying);
        assert_eq!(found.filled_slots.get("order_id").map(String::as_str), Some("ORD-1001"));
    }
}

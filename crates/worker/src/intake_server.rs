// Object-created notification endpoint
//
// Accepts Event Grid style deliveries (a JSON array of events, or a single
// event) and hands each one to TriggerIntake. The subscription validation
// handshake is answered inline.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use inbound_durable::intake::{IntakeOutcome, ObjectCreatedEvent, TriggerIntake};
use inbound_durable::Metadata;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Event type of the subscription validation handshake
pub const SUBSCRIPTION_VALIDATION_EVENT: &str = "Microsoft.EventGrid.SubscriptionValidationEvent";

/// State shared by the intake routes
#[derive(Clone)]
pub struct IntakeState {
    pub intake: Arc<TriggerIntake>,
}

impl IntakeState {
    pub fn new(intake: Arc<TriggerIntake>) -> Self {
        Self { intake }
    }
}

/// One delivered event
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "type")]
    pub event_type: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub data: Value,
    /// Extra metadata merged into the workflow envelope
    #[serde(default)]
    pub metadata: Metadata,
}

impl GridEvent {
    fn validation_code(&self) -> Option<&str> {
        if !self
            .event_type
            .eq_ignore_ascii_case(SUBSCRIPTION_VALIDATION_EVENT)
        {
            return None;
        }
        self.data.get("validationCode").and_then(Value::as_str)
    }

    fn into_created(self) -> ObjectCreatedEvent {
        let url = self
            .data
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        ObjectCreatedEvent {
            event_type: self.event_type,
            url,
            metadata: self.metadata,
        }
    }
}

/// Request body: a batch or a single event
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EventBatch {
    Many(Vec<GridEvent>),
    One(GridEvent),
}

impl EventBatch {
    pub fn into_events(self) -> Vec<GridEvent> {
        match self {
            Self::Many(events) => events,
            Self::One(event) => vec![event],
        }
    }
}

/// Per-batch counts returned to the sender
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeSummary {
    pub started: usize,
    pub ignored: usize,
    pub rejected: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn receive_events(
    State(state): State<IntakeState>,
    Json(batch): Json<EventBatch>,
) -> Response {
    let events = batch.into_events();

    if let Some(code) = events.iter().find_map(GridEvent::validation_code) {
        info!("answering subscription validation");
        return Json(json!({ "validationResponse": code })).into_response();
    }

    let mut summary = IntakeSummary::default();
    for event in events {
        let event_id = event.id.clone().unwrap_or_default();
        let created = event.into_created();
        match state.intake.handle(&created).await {
            Ok(IntakeOutcome::Started { .. }) => summary.started += 1,
            Ok(IntakeOutcome::Ignored(_)) => summary.ignored += 1,
            Ok(IntakeOutcome::Rejected(_)) => summary.rejected += 1,
            Err(e) => {
                // Failing the delivery makes the sender retry the batch
                error!(event_id = %event_id, url = %created.url, error = %e, "intake failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": e.to_string() })),
                )
                    .into_response();
            }
        }
    }

    info!(
        started = summary.started,
        ignored = summary.ignored,
        rejected = summary.rejected,
        "events received"
    );
    Json(summary).into_response()
}

/// Build the intake router
pub fn router(state: IntakeState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", post(receive_events))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

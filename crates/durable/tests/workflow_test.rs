//! End-to-end workflow behaviour on the in-memory backends
//!
//! Run with: cargo test -p inbound-durable --test workflow_test

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use inbound_durable::capability::{
    AnalysisResult, CapabilityError, DocumentAnalyzer, OperationStatus,
};
use inbound_durable::engine::{
    AdvanceOutcome, Alert, AlertPublisher, Dispatcher, ExecuteOutcome, OperationPoller,
    PollOutcome, QueueSender, RouteOutcome, Step, StepContext, StepError, StepExecutor,
    StepOutcome, WorkflowController,
};
use inbound_durable::envelope::{codec, keys, AsyncOperationHandle, Metadata, WorkflowEnvelope};
use inbound_durable::intake::{IntakeOutcome, ObjectCreatedEvent, TriggerIntake, BLOB_CREATED_EVENT};
use inbound_durable::storage::{
    BlobPath, InMemoryObjectStore, NewObject, ObjectStore, OutcomeWriter,
};
use inbound_durable::transport::InMemoryMessageQueue;
use inbound_durable::{EngineConfig, RoutingTable};

const ALERTS: &str = "workflow-alerts";
const OPERATIONS: &str = "documentintelligence-events";

/// Everything wired together the way the worker does it
struct Harness {
    queue: Arc<InMemoryMessageQueue>,
    store: Arc<InMemoryObjectStore>,
    sender: Arc<QueueSender>,
    alerts: Arc<AlertPublisher>,
    dispatcher: Arc<Dispatcher>,
    controller: Arc<WorkflowController>,
    outcomes: Arc<OutcomeWriter>,
    config: Arc<EngineConfig>,
}

impl Harness {
    fn new(config: EngineConfig) -> Self {
        let queue = Arc::new(InMemoryMessageQueue::new());
        let store = Arc::new(InMemoryObjectStore::new());
        let sender = Arc::new(QueueSender::new(queue.clone()));
        let alerts = Arc::new(AlertPublisher::new(sender.clone(), config.alert_queue.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            sender.clone(),
            config.routing.clone(),
            alerts.clone(),
        ));
        let controller = Arc::new(WorkflowController::new(dispatcher.clone(), alerts.clone()));
        let outcomes = Arc::new(OutcomeWriter::new(
            store.clone(),
            config.output_container.clone(),
        ));
        Self {
            queue,
            store,
            sender,
            alerts,
            dispatcher,
            controller,
            outcomes,
            config: Arc::new(config),
        }
    }

    fn intake(&self) -> TriggerIntake {
        TriggerIntake::new(
            self.store.clone(),
            self.dispatcher.clone(),
            self.alerts.clone(),
            self.config.clone(),
        )
    }

    fn poller(&self, analyzer: Arc<dyn DocumentAnalyzer>) -> OperationPoller {
        OperationPoller::new(
            analyzer,
            self.sender.clone(),
            self.outcomes.clone(),
            self.controller.clone(),
            OPERATIONS,
        )
    }

    fn alerts(&self) -> Vec<Alert> {
        self.queue
            .bodies(ALERTS)
            .iter()
            .map(|b| codec::decode(b).unwrap())
            .collect()
    }

    fn envelopes(&self, queue: &str) -> Vec<WorkflowEnvelope> {
        self.queue
            .bodies(queue)
            .iter()
            .map(|b| codec::decode_envelope(b).unwrap())
            .collect()
    }
}

fn ctx() -> StepContext {
    StepContext::new(CancellationToken::new())
}

fn upload(store: &InMemoryObjectStore, name: &str, metadata: &[(&str, &str)]) {
    let mut md = Metadata::new();
    for (k, v) in metadata {
        md.insert(*k, *v);
    }
    store.insert(
        &BlobPath::new("input", name).unwrap(),
        NewObject::new(b"bonjour".to_vec(), "text/plain").with_metadata(md),
    );
}

fn created(name: &str) -> ObjectCreatedEvent {
    ObjectCreatedEvent::new(
        BLOB_CREATED_EVENT,
        format!("https://acct.blob.core.windows.net/input/{name}"),
    )
}

// ============================================
// Intake
// ============================================

#[tokio::test]
async fn test_intake_builds_initial_envelope() {
    let h = Harness::new(EngineConfig::default());
    upload(
        &h.store,
        "claim1.txt",
        &[("reference_id", "R1"), ("workflow_steps", "translation,pii")],
    );

    let outcome = h.intake().handle(&created("claim1.txt")).await.unwrap();
    let IntakeOutcome::Started { envelope, route } = outcome else {
        panic!("workflow not started");
    };
    assert_eq!(envelope.reference_id, "R1");
    assert_eq!(envelope.blob_path, "input/claim1.txt");
    assert_eq!(envelope.current_step, "translation");
    assert_eq!(envelope.remaining_steps.as_slice(), ["pii"]);
    assert_eq!(envelope.metadata.get(keys::SOURCE_BLOB), Some("input/claim1.txt"));
    assert!(matches!(route, RouteOutcome::Enqueued { ref queue, .. } if queue == "translation-in"));

    assert_eq!(h.envelopes("translation-in"), [envelope]);
    assert!(h.alerts().is_empty());
}

#[tokio::test]
async fn test_intake_without_steps_or_default_alerts() {
    let h = Harness::new(EngineConfig::default());
    upload(&h.store, "claim2.txt", &[("reference_id", "R2")]);

    let outcome = h.intake().handle(&created("claim2.txt")).await.unwrap();
    assert_eq!(outcome, IntakeOutcome::Rejected("workflow steps missing".to_string()));

    let alerts = h.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].reference_id, "R2");
    assert_eq!(alerts[0].error, "workflow steps missing");
    assert_eq!(h.queue.queue_names(), [ALERTS]);
}

#[tokio::test]
async fn test_intake_falls_back_to_default_workflow() {
    let h = Harness::new(EngineConfig::default().with_default_workflow(["pii"]));
    upload(&h.store, "claim3.txt", &[("reference_id", "R3")]);

    let outcome = h.intake().handle(&created("claim3.txt")).await.unwrap();
    assert!(matches!(outcome, IntakeOutcome::Started { .. }));
    assert_eq!(h.envelopes("pii-in")[0].current_step, "pii");
}

#[tokio::test]
async fn test_intake_without_reference_alerts_unknown() {
    let h = Harness::new(EngineConfig::default());
    upload(&h.store, "claim4.txt", &[("workflow_steps", "pii")]);

    let outcome = h.intake().handle(&created("claim4.txt")).await.unwrap();
    assert_eq!(outcome, IntakeOutcome::Rejected("missing correlation id".to_string()));
    assert_eq!(h.alerts()[0].reference_id, "unknown");
    assert!(h.queue.is_empty("pii-in"));
}

#[tokio::test]
async fn test_intake_ignores_other_containers() {
    let h = Harness::new(EngineConfig::default());
    let event = ObjectCreatedEvent::new(
        BLOB_CREATED_EVENT,
        "https://acct.blob.core.windows.net/output/translation/x.json",
    );

    let outcome = h.intake().handle(&event).await.unwrap();
    assert!(matches!(outcome, IntakeOutcome::Ignored(_)));
    assert!(h.queue.queue_names().is_empty());
}

// ============================================
// Dispatch
// ============================================

#[test_log::test(tokio::test)]
async fn test_unknown_step_is_alerted_not_raised() {
    let h = Harness::new(EngineConfig::default());
    let envelope =
        WorkflowEnvelope::start("R1", "input/claim1.txt", ["foo"], Metadata::new()).unwrap();

    let outcome = h.dispatcher.route(&envelope).await.unwrap();
    assert_eq!(outcome, RouteOutcome::Unroutable);

    let alerts = h.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].failed_step, "foo");
    assert!(alerts[0].error.contains("foo"));
}

// ============================================
// Steps
// ============================================

/// Records a fixed output location
struct RecordingStep;

#[async_trait]
impl Step for RecordingStep {
    fn name(&self) -> &'static str {
        "pii"
    }

    async fn execute(
        &self,
        _ctx: &StepContext,
        envelope: &mut WorkflowEnvelope,
    ) -> Result<StepOutcome, StepError> {
        envelope.record_output("pii", "output/pii/claim1.txt_pii_output.json");
        Ok(StepOutcome::Completed)
    }
}

/// Splits its input into a fixed number of siblings
struct SplittingStep(u32);

#[async_trait]
impl Step for SplittingStep {
    fn name(&self) -> &'static str {
        "splitter"
    }

    async fn execute(
        &self,
        _ctx: &StepContext,
        envelope: &mut WorkflowEnvelope,
    ) -> Result<StepOutcome, StepError> {
        let children = (0..self.0)
            .filter_map(|i| {
                envelope.branch(
                    format!("output/images/page{}_{i}.png", i + 1),
                    [
                        (keys::SOURCE_PAGE, (i + 1).to_string()),
                        (keys::SOURCE_IMAGE_INDEX, "0".to_string()),
                    ],
                )
            })
            .collect();
        Ok(StepOutcome::FannedOut(children))
    }
}

#[tokio::test]
async fn test_last_step_finishes_workflow() {
    let h = Harness::new(EngineConfig::default());
    let executor = StepExecutor::new(Arc::new(RecordingStep), h.controller.clone());
    let envelope =
        WorkflowEnvelope::start("R1", "input/claim1.txt", ["pii"], Metadata::new()).unwrap();

    let outcome = executor
        .execute(&codec::encode(&envelope).unwrap(), &ctx())
        .await
        .unwrap();
    assert_eq!(outcome, ExecuteOutcome::Advanced(AdvanceOutcome::Finished));
    assert!(h.queue.queue_names().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_fan_out_creates_independent_siblings() {
    let config = EngineConfig::default()
        .with_routing(RoutingTable::default().with_route("splitter", "splitter-in"));
    let h = Harness::new(config);
    let executor = StepExecutor::new(Arc::new(SplittingStep(3)), h.controller.clone());

    let mut metadata = Metadata::new();
    metadata.insert("claim-type", "water");
    let parent =
        WorkflowEnvelope::start("R1", "input/claim1.pdf", ["splitter", "pii"], metadata).unwrap();

    let outcome = executor
        .execute(&codec::encode(&parent).unwrap(), &ctx())
        .await
        .unwrap();
    let ExecuteOutcome::FannedOut(routes) = outcome else {
        panic!("expected fan-out");
    };
    assert_eq!(routes.len(), 3);

    let children = h.envelopes("pii-in");
    assert_eq!(children.len(), 3);
    for (i, child) in children.iter().enumerate() {
        assert_eq!(child.reference_id, "R1");
        assert_eq!(child.current_step, "pii");
        assert!(child.remaining_steps.is_empty());
        assert_eq!(child.metadata.get("claim-type"), Some("water"));
        assert_eq!(child.metadata.get(keys::SOURCE_PAGE), Some((i + 1).to_string().as_str()));
        assert_eq!(child.blob_path, format!("output/images/page{}_{i}.png", i + 1));
        assert_eq!(child.last_output(), Some(child.blob_path.as_str()));
    }

    // The parent is not re-dispatched
    assert!(h.queue.is_empty("splitter-in"));
    assert!(h.alerts().is_empty());
}

// ============================================
// Async operation polling
// ============================================

/// Analyzer whose operation status is scripted per test
struct ScriptedAnalyzer {
    status: Mutex<Option<OperationStatus>>,
}

impl ScriptedAnalyzer {
    fn new(status: OperationStatus) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(Some(status)),
        })
    }
}

#[async_trait]
impl DocumentAnalyzer for ScriptedAnalyzer {
    async fn begin_analysis(
        &self,
        _model: &str,
        _content: Vec<u8>,
    ) -> Result<String, CapabilityError> {
        Ok("op-1".to_string())
    }

    async fn operation_status(
        &self,
        _operation_id: &str,
    ) -> Result<OperationStatus, CapabilityError> {
        self.status
            .lock()
            .clone()
            .ok_or_else(|| CapabilityError::Request("connection reset".to_string()))
    }
}

fn poll_body() -> String {
    let envelope = WorkflowEnvelope::start(
        "R1",
        "input/claim1.pdf",
        ["documentintelligence", "pii"],
        Metadata::new(),
    )
    .unwrap();
    let handle = AsyncOperationHandle::new(
        "op-1",
        "input/claim1.pdf",
        Some("prebuilt-document".to_string()),
        envelope,
    );
    codec::encode(&handle).unwrap()
}

#[tokio::test]
async fn test_running_operation_is_requeued_byte_identical() {
    let h = Harness::new(EngineConfig::default());
    let poller = h.poller(ScriptedAnalyzer::new(OperationStatus::Running));
    let body = poll_body();

    let outcome = poller.poll(&body, &ctx()).await.unwrap();
    assert!(matches!(outcome, PollOutcome::Requeued { .. }));
    assert_eq!(
        h.queue.delayed_bodies(OPERATIONS),
        [(body, Duration::from_secs(30))]
    );
    assert!(h.store.list("output").is_empty());
}

#[tokio::test]
async fn test_completed_operation_writes_output_and_advances() {
    let h = Harness::new(EngineConfig::default());
    let result = AnalysisResult {
        content: "Claim form".to_string(),
        raw: serde_json::json!({"pages": [{"pageNumber": 1}]}),
    };
    let poller = h.poller(ScriptedAnalyzer::new(OperationStatus::Completed(Some(result))));

    let outcome = poller.poll(&poll_body(), &ctx()).await.unwrap();
    assert!(matches!(
        outcome,
        PollOutcome::Advanced(AdvanceOutcome::Dispatched(RouteOutcome::Enqueued { .. }))
    ));

    let location = "output/documentintelligence/claim1.pdf_document_intelligence_output.json";
    assert_eq!(h.store.list("output"), [location]);

    let artifact: serde_json::Value = serde_json::from_slice(
        &h.store
            .read(&BlobPath::parse(location).unwrap())
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(artifact["processor"], "document intelligence");
    assert_eq!(artifact["main_content"], "Claim form");
    assert_eq!(artifact["message"]["pages"][0]["pageNumber"], 1);

    let next = h.envelopes("pii-in");
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].output_of("documentintelligence"), Some(location));
    assert_eq!(next[0].last_output(), Some(location));
}

#[test_log::test(tokio::test)]
async fn test_operation_without_result_fails_workflow() {
    let h = Harness::new(EngineConfig::default());
    let poller = h.poller(ScriptedAnalyzer::new(OperationStatus::Completed(None)));

    let outcome = poller.poll(&poll_body(), &ctx()).await.unwrap();
    assert_eq!(outcome, PollOutcome::Failed);

    let alerts = h.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].reference_id, "R1");
    assert_eq!(alerts[0].failed_step, "documentintelligence");
    assert!(h.queue.is_empty("pii-in"));
    assert!(h.queue.is_empty(OPERATIONS));
}

#[tokio::test]
async fn test_status_error_fails_workflow() {
    let h = Harness::new(EngineConfig::default());
    let analyzer = ScriptedAnalyzer::new(OperationStatus::Running);
    *analyzer.status.lock() = None;
    let poller = h.poller(analyzer);

    let result = poller.poll(&poll_body(), &ctx()).await;
    assert!(result.is_err());
    assert!(h.alerts()[0].error.contains("connection reset"));
    assert!(h.queue.is_empty(OPERATIONS));
}

#[tokio::test]
async fn test_malformed_poll_message_is_rejected() {
    let h = Harness::new(EngineConfig::default());
    let poller = h.poller(ScriptedAnalyzer::new(OperationStatus::Running));

    let outcome = poller
        .poll("{\"operation_id\": \"op-1\"}", &ctx())
        .await
        .unwrap();
    assert!(matches!(outcome, PollOutcome::Rejected(_)));
    assert_eq!(h.alerts()[0].reference_id, "unknown");
}

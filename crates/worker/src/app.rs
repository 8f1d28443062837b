//! Process wiring
//!
//! Builds the engine once, subscribes one executor per available step to
//! its queue plus the operation poller to the operation queue, and serves
//! the intake endpoint until cancelled.

use std::sync::Arc;

use anyhow::{Context, Result};
use inbound_capabilities::{
    ChatDescriber, DocumentAnalysisClient, ImageAnalysisClient, LanguageClient, TranslatorClient,
};
use inbound_durable::capability::{
    DocumentAnalyzer, ImageAnalyzer, ImageDescriber, LanguageDetector, PdfImageExtractor,
    PiiRedactor, Translator,
};
use inbound_durable::engine::{
    AlertPublisher, Dispatcher, OperationPoller, QueueSender, Step, StepContext, StepExecutor,
    WorkflowController,
};
use inbound_durable::intake::TriggerIntake;
use inbound_durable::storage::{FsObjectStore, ObjectStore, OutcomeWriter};
use inbound_durable::transport::{
    InMemoryMessageQueue, MessageQueue, PostgresMessageQueue, ReceivedMessage,
};
use inbound_durable::worker::{PollerConfig, QueuePool, QueuePoolConfig};
use inbound_durable::EngineConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{CapabilityConfig, WorkerConfig};
use crate::intake_server::{self, IntakeState};
use crate::pdf::LopdfImageExtractor;
use crate::steps::{
    DocumentIntelligenceStep, GptVisionStep, ImageAnalysisStep, PdfImagesStep, PiiStep,
    TranslationStep,
};

/// Capability implementations available to the steps
#[derive(Clone)]
pub struct Capabilities {
    pub detector: Option<Arc<dyn LanguageDetector>>,
    pub translator: Option<Arc<dyn Translator>>,
    pub document: Option<Arc<dyn DocumentAnalyzer>>,
    pub image_analyzer: Option<Arc<dyn ImageAnalyzer>>,
    pub describer: Option<Arc<dyn ImageDescriber>>,
    pub redactor: Option<Arc<dyn PiiRedactor>>,
    pub pdf_extractor: Arc<dyn PdfImageExtractor>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            detector: None,
            translator: None,
            document: None,
            image_analyzer: None,
            describer: None,
            redactor: None,
            pdf_extractor: Arc::new(LopdfImageExtractor::new()),
        }
    }
}

impl Capabilities {
    /// HTTP clients for every configured service
    pub fn from_config(config: &CapabilityConfig) -> Self {
        let mut caps = Self::default();

        if let Some(service) = &config.language {
            caps.detector = Some(Arc::new(LanguageClient::new(service.clone())));
        }
        if let Some(service) = config.pii_service() {
            caps.redactor = Some(Arc::new(LanguageClient::new(service.clone())));
        }
        if let Some(service) = &config.translator {
            let mut client = TranslatorClient::new(service.clone());
            if let Some(region) = &config.translator_region {
                client = client.with_region(region.clone());
            }
            caps.translator = Some(Arc::new(client));
        }
        if let Some(service) = &config.document {
            caps.document = Some(Arc::new(DocumentAnalysisClient::new(service.clone())));
        }
        if let Some(service) = &config.vision {
            caps.image_analyzer = Some(Arc::new(ImageAnalysisClient::new(service.clone())));
        }
        match (&config.chat, &config.chat_deployment) {
            (Some(service), Some(deployment)) => {
                caps.describer = Some(Arc::new(ChatDescriber::new(
                    service.clone(),
                    deployment.clone(),
                )));
            }
            (Some(_), None) => {
                warn!("GPT4_VISION_ENDPOINT set without GPT4_VISION_DEPLOYMENT_NAME")
            }
            _ => {}
        }
        caps
    }

    pub fn with_language(
        mut self,
        detector: Arc<dyn LanguageDetector>,
        translator: Arc<dyn Translator>,
    ) -> Self {
        self.detector = Some(detector);
        self.translator = Some(translator);
        self
    }

    pub fn with_document_analyzer(mut self, analyzer: Arc<dyn DocumentAnalyzer>) -> Self {
        self.document = Some(analyzer);
        self
    }

    pub fn with_image_analyzer(mut self, analyzer: Arc<dyn ImageAnalyzer>) -> Self {
        self.image_analyzer = Some(analyzer);
        self
    }

    pub fn with_describer(mut self, describer: Arc<dyn ImageDescriber>) -> Self {
        self.describer = Some(describer);
        self
    }

    pub fn with_redactor(mut self, redactor: Arc<dyn PiiRedactor>) -> Self {
        self.redactor = Some(redactor);
        self
    }

    pub fn with_pdf_extractor(mut self, extractor: Arc<dyn PdfImageExtractor>) -> Self {
        self.pdf_extractor = extractor;
        self
    }
}

/// The engine components shared by every queue handler
#[derive(Clone)]
pub struct EngineServices {
    pub config: Arc<EngineConfig>,
    pub queue: Arc<dyn MessageQueue>,
    pub store: Arc<dyn ObjectStore>,
    pub sender: Arc<QueueSender>,
    pub alerts: Arc<AlertPublisher>,
    pub dispatcher: Arc<Dispatcher>,
    pub controller: Arc<WorkflowController>,
    pub outcomes: Arc<OutcomeWriter>,
}

impl EngineServices {
    pub fn new(
        config: EngineConfig,
        queue: Arc<dyn MessageQueue>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        let sender = Arc::new(QueueSender::new(queue.clone()));
        let alerts = Arc::new(AlertPublisher::new(sender.clone(), config.alert_queue.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            sender.clone(),
            config.routing.clone(),
            alerts.clone(),
        ));
        let controller = Arc::new(WorkflowController::new(dispatcher.clone(), alerts.clone()));
        let outcomes = Arc::new(OutcomeWriter::new(store.clone(), config.output_container.clone()));

        Self {
            config: Arc::new(config),
            queue,
            store,
            sender,
            alerts,
            dispatcher,
            controller,
            outcomes,
        }
    }

    pub fn intake(&self) -> TriggerIntake {
        TriggerIntake::new(
            self.store.clone(),
            self.dispatcher.clone(),
            self.alerts.clone(),
            self.config.clone(),
        )
    }

    /// Every step whose capabilities are available
    pub fn steps(&self, caps: &Capabilities) -> Vec<Arc<dyn Step>> {
        let mut steps: Vec<Arc<dyn Step>> = Vec::new();

        match (&caps.detector, &caps.translator) {
            (Some(detector), Some(translator)) => steps.push(Arc::new(TranslationStep::new(
                self.store.clone(),
                self.outcomes.clone(),
                detector.clone(),
                translator.clone(),
                self.config.translation.clone(),
            ))),
            _ => warn!("translation step disabled: language or translator service not configured"),
        }

        match &caps.document {
            Some(analyzer) => steps.push(Arc::new(
                DocumentIntelligenceStep::new(
                    self.store.clone(),
                    analyzer.clone(),
                    self.sender.clone(),
                    self.config.operation_queue.clone(),
                    self.config.default_document_model.clone(),
                )
                .with_initial_poll_delay(self.config.initial_poll_delay),
            )),
            None => warn!("documentintelligence step disabled: service not configured"),
        }

        match &caps.image_analyzer {
            Some(analyzer) => steps.push(Arc::new(ImageAnalysisStep::new(
                self.store.clone(),
                self.outcomes.clone(),
                analyzer.clone(),
            ))),
            None => warn!("aivision step disabled: service not configured"),
        }

        match &caps.describer {
            Some(describer) => steps.push(Arc::new(GptVisionStep::new(
                self.store.clone(),
                self.outcomes.clone(),
                describer.clone(),
            ))),
            None => warn!("gptvision step disabled: service not configured"),
        }

        match &caps.redactor {
            Some(redactor) => steps.push(Arc::new(PiiStep::new(
                self.store.clone(),
                self.outcomes.clone(),
                redactor.clone(),
                self.config.pii.clone(),
            ))),
            None => warn!("pii step disabled: service not configured"),
        }

        steps.push(Arc::new(PdfImagesStep::new(
            self.store.clone(),
            self.outcomes.clone(),
            caps.pdf_extractor.clone(),
        )));

        steps
    }

    /// Poller for parked document analyses
    pub fn operation_poller(&self, caps: &Capabilities) -> Option<OperationPoller> {
        let analyzer = caps.document.clone()?;
        Some(
            OperationPoller::new(
                analyzer,
                self.sender.clone(),
                self.outcomes.clone(),
                self.controller.clone(),
                self.config.operation_queue.clone(),
            )
            .with_poll_delay(self.config.poll_delay),
        )
    }

    /// Subscribe every step and the operation poller to a pool
    pub fn register(&self, pool: &QueuePool, caps: &Capabilities, cancel: &CancellationToken) {
        for step in self.steps(caps) {
            let Some(queue) = self.dispatcher.routing().queue_for(step.name()) else {
                warn!(step = step.name(), "no queue configured for step, not subscribing");
                continue;
            };
            let queue = queue.to_string();
            let executor = Arc::new(StepExecutor::new(step, self.controller.clone()));
            let cancel = cancel.clone();
            pool.register_handler(&queue, move |message: ReceivedMessage| {
                let executor = executor.clone();
                let ctx = StepContext::new(cancel.clone())
                    .with_delivery(message.id, message.dequeue_count);
                async move {
                    executor
                        .execute(&message.body, &ctx)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }
            });
        }

        if let Some(poller) = self.operation_poller(caps) {
            let queue = poller.queue().to_string();
            let poller = Arc::new(poller);
            let cancel = cancel.clone();
            pool.register_handler(&queue, move |message: ReceivedMessage| {
                let poller = poller.clone();
                let ctx = StepContext::new(cancel.clone())
                    .with_delivery(message.id, message.dequeue_count);
                async move {
                    poller
                        .poll(&message.body, &ctx)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }
            });
        }
    }
}

/// The worker process
pub struct InboundWorker {
    config: WorkerConfig,
    services: EngineServices,
    capabilities: Capabilities,
}

impl InboundWorker {
    /// Connect the transport and storage named by the configuration
    pub async fn new(config: WorkerConfig) -> Result<Self> {
        let queue: Arc<dyn MessageQueue> = match &config.database_url {
            Some(url) => {
                let queue = PostgresMessageQueue::connect(url)
                    .await
                    .context("Failed to connect to the queue database")?;
                queue
                    .migrate()
                    .await
                    .context("Failed to run queue migrations")?;
                info!("using Postgres message transport");
                Arc::new(queue)
            }
            None => {
                warn!("DATABASE_URL not set, using in-memory message transport");
                Arc::new(InMemoryMessageQueue::new())
            }
        };
        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&config.storage_root));
        let capabilities = Capabilities::from_config(&config.capabilities);

        Ok(Self::with_parts(config, queue, store, capabilities))
    }

    /// Assemble a worker from explicit parts
    pub fn with_parts(
        config: WorkerConfig,
        queue: Arc<dyn MessageQueue>,
        store: Arc<dyn ObjectStore>,
        capabilities: Capabilities,
    ) -> Self {
        let services = EngineServices::new(config.engine.clone(), queue, store);
        Self {
            config,
            services,
            capabilities,
        }
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    /// A pool with every available handler registered
    pub fn build_pool(&self, cancel: &CancellationToken) -> QueuePool {
        let mut pool_config = QueuePoolConfig::new()
            .with_max_concurrency(self.config.max_concurrency)
            .with_max_dequeue_count(self.config.max_dequeue_count)
            .with_poller(
                PollerConfig::new().with_visibility_timeout(self.config.visibility_timeout),
            );
        if let Some(id) = &self.config.worker_id {
            pool_config = pool_config.with_worker_id(id.clone());
        }

        let pool = QueuePool::new(self.services.queue.clone(), pool_config);
        self.services.register(&pool, &self.capabilities, cancel);
        pool
    }

    /// Consume queues and serve intake until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let pool = self.build_pool(&cancel);
        pool.start()
            .await
            .context("Failed to start queue consumers")?;
        info!(
            worker_id = %pool.worker_id(),
            queues = ?pool.queue_names(),
            "queue consumers started"
        );

        let listener = tokio::net::TcpListener::bind(&self.config.intake_bind_address)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.intake_bind_address))?;
        info!(address = %self.config.intake_bind_address, "intake endpoint listening");

        let app = intake_server::router(IntakeState::new(Arc::new(self.services.intake())));
        let shutdown = cancel.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if served.is_err() {
            cancel.cancel();
        }

        info!("draining queue consumers");
        pool.shutdown()
            .await
            .context("Queue consumers did not stop cleanly")?;
        served.context("Intake endpoint failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDocumentAnalyzer, FakeLanguage, FakeRedactor};
    use inbound_durable::storage::InMemoryObjectStore;

    fn services() -> EngineServices {
        EngineServices::new(
            EngineConfig::default(),
            Arc::new(InMemoryMessageQueue::new()),
            Arc::new(InMemoryObjectStore::new()),
        )
    }

    fn names(steps: &[Arc<dyn Step>]) -> Vec<&'static str> {
        steps.iter().map(|s| s.name()).collect()
    }

    #[test]
    fn test_only_pdf_images_without_capabilities() {
        let services = services();
        let caps = Capabilities::default();
        assert_eq!(names(&services.steps(&caps)), vec!["pdfimages"]);
        assert!(services.operation_poller(&caps).is_none());
    }

    #[test]
    fn test_steps_follow_capabilities() {
        let services = services();
        let language = Arc::new(FakeLanguage::detecting("fr"));
        let caps = Capabilities::default()
            .with_language(language.clone(), language)
            .with_redactor(Arc::new(FakeRedactor::new()))
            .with_document_analyzer(Arc::new(FakeDocumentAnalyzer::new()));

        assert_eq!(
            names(&services.steps(&caps)),
            vec!["translation", "documentintelligence", "pii", "pdfimages"]
        );
        assert!(services.operation_poller(&caps).is_some());
    }

    #[test]
    fn test_pool_subscribes_step_and_operation_queues() {
        let services = services();
        let caps =
            Capabilities::default().with_document_analyzer(Arc::new(FakeDocumentAnalyzer::new()));
        let pool = QueuePool::new(services.queue.clone(), QueuePoolConfig::new());
        services.register(&pool, &caps, &CancellationToken::new());

        let mut queues = pool.queue_names();
        queues.sort();
        assert_eq!(
            queues,
            vec!["documentintelligence-events", "documentintelligence-in", "pdfimages-in"]
        );
    }
}

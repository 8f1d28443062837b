//! # Inbound Workflow Engine
//!
//! A queue-driven saga engine for document processing pipelines.
//!
//! ## Features
//!
//! - **State in the message**: a [`WorkflowEnvelope`] carries the whole
//!   workflow; there is no workflow database
//! - **Queue routing**: every step consumes its own queue, resolved
//!   through a [`RoutingTable`]
//! - **Long-running operations**: parked as poll messages and re-enqueued
//!   with a delay until the service is done
//! - **Fan-out**: one input can spawn independent sibling workflows
//! - **Alerting**: every terminal failure publishes an [`Alert`]
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────────────────┐
//! │ TriggerIntake│──▶│  Dispatcher  │──▶│ MessageQueue (<step>-in)│
//! └──────────────┘   └──────────────┘   └────────────┬────────────┘
//!                           ▲                        │
//!                           │ advance / fail         ▼
//!                  ┌────────┴─────────┐     ┌──────────────────┐
//!                  │WorkflowController│◀────│  StepExecutor    │
//!                  └────────┬─────────┘     │  OperationPoller │
//!                           │               └──────────────────┘
//!                           ▼
//!                  ┌──────────────────┐
//!                  │  AlertPublisher  │
//!                  └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use inbound_durable::prelude::*;
//!
//! struct Uppercase;
//!
//! #[async_trait]
//! impl Step for Uppercase {
//!     fn name(&self) -> &'static str {
//!         "uppercase"
//!     }
//!
//!     async fn execute(
//!         &self,
//!         ctx: &StepContext,
//!         envelope: &mut WorkflowEnvelope,
//!     ) -> Result<StepOutcome, StepError> {
//!         envelope.record_output(self.name(), "output/uppercase/out.json");
//!         Ok(StepOutcome::Completed)
//!     }
//! }
//! ```

pub mod capability;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod intake;
pub mod storage;
pub mod transport;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::capability::CapabilityError;
    pub use crate::config::{step_names, EngineConfig, RoutingTable};
    pub use crate::engine::{
        AlertPublisher, Dispatcher, OperationPoller, QueueSender, Step, StepContext, StepError,
        StepExecutor, StepOutcome, WorkflowController,
    };
    pub use crate::envelope::{keys, AsyncOperationHandle, Metadata, WorkflowEnvelope};
    pub use crate::intake::{ObjectCreatedEvent, TriggerIntake};
    pub use crate::storage::{BlobPath, ObjectStore, OutcomeWriter, StepArtifact};
    pub use crate::transport::{MessageQueue, ReceivedMessage};
    pub use crate::worker::{QueuePool, QueuePoolConfig};
    pub use async_trait::async_trait;
}

// Re-export key types at crate root
pub use config::{EngineConfig, RoutingTable};
pub use engine::{
    Alert, AlertPublisher, Dispatcher, ExecuteOutcome, OperationPoller, Step, StepContext,
    StepError, StepExecutor, StepOutcome, WorkflowController,
};
pub use envelope::{AsyncOperationHandle, EnvelopeError, Metadata, WorkflowEnvelope};
pub use intake::{IntakeOutcome, ObjectCreatedEvent, TriggerIntake};
pub use storage::{InMemoryObjectStore, ObjectStore, OutcomeWriter};
pub use transport::{InMemoryMessageQueue, MessageQueue, PostgresMessageQueue, QueueError};
pub use worker::{QueuePool, QueuePoolConfig, QueuePoolError};

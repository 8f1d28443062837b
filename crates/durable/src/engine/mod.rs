//! Workflow engine
//!
//! This module contains:
//! - [`Dispatcher`] - routes envelopes to the queue of their current step
//! - [`StepExecutor`] / [`Step`] - the uniform step wrapper and contract
//! - [`OperationPoller`] - resumes workflows parked on long-running operations
//! - [`WorkflowController`] - advance or fail
//! - [`AlertPublisher`] - best-effort failure notification

mod alerting;
mod controller;
mod dispatcher;
mod executor;
mod operation_poller;

pub use alerting::{Alert, AlertPublisher};
pub use controller::{AdvanceOutcome, WorkflowController};
pub use dispatcher::{DispatchError, Dispatcher, QueueSender, RouteOutcome};
pub use executor::{
    DropReason, ExecuteError, ExecuteOutcome, Step, StepContext, StepError, StepExecutor,
    StepOutcome,
};
pub use operation_poller::{
    document_analysis_file_name, OperationPoller, PollOutcome, DOCUMENT_ANALYSIS_FOLDER,
    DOCUMENT_ANALYSIS_PROCESSOR, NO_RESULT_ERROR,
};

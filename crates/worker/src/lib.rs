//! Inbound document processing worker
//!
//! Hosts the concrete workflow steps, the HTTP intake endpoint and the
//! process wiring around the `inbound-durable` engine.

pub mod app;
pub mod config;
pub mod intake_server;
pub mod pdf;
pub mod steps;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use app::{Capabilities, EngineServices, InboundWorker};
pub use config::{CapabilityConfig, WorkerConfig};
pub use intake_server::{router, IntakeState, IntakeSummary};
pub use pdf::LopdfImageExtractor;

//! Queue consumption
//!
//! This module provides:
//! - [`QueuePool`] - one poll loop per queue, semaphore-limited handlers
//! - [`QueuePoller`] - message receiving with exponential backoff
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        QueuePool                             │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │ QueuePoller │  │ QueuePoller │  │ QueuePoller         │  │
//! │  │ (pii-in)    │  │ (ocr-in)    │  │ (operation queue)   │  │
//! │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  │
//! │         └────────────────┼────────────────────┘             │
//! │                          ▼                                   │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │        Message handlers (Semaphore-limited)          │    │
//! │  │   Ok => delete   Err => redeliver   N > max => poison│    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod poller;
mod pool;

pub use poller::{PollerConfig, QueuePoller};
pub use pool::{
    poison_queue_name, HandlerResult, MessageHandler, QueuePool, QueuePoolConfig,
    QueuePoolError, QueuePoolStatus, POISON_SUFFIX,
};

//! Transport queues
//!
//! This module contains:
//! - [`MessageQueue`] trait - visibility-timeout queue abstraction
//! - [`InMemoryMessageQueue`] - in-memory backend for tests and local runs
//! - [`PostgresMessageQueue`] - production backend

mod memory;
mod postgres;
mod queue;

pub use memory::InMemoryMessageQueue;
pub use postgres::PostgresMessageQueue;
pub use queue::*;

//! Audit side-channel.
//!
//! Stages hand records to an [`AuditSink`], which queues them without
//! waiting. A dispatcher task drains the queue in order and persists each
//! record to every attached [`AuditStore`](tollgate_core::traits::AuditStore).
//! Delivery problems are logged and never reach the workflow.

pub mod sink;
pub mod store;

pub use sink::{AuditDispatcher, AuditSink};
pub use store::{InMemoryAuditStore, JsonlAuditStore, TracingAuditStore};

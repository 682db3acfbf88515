pub mod audit;
pub mod graph;
pub mod pipeline;
pub mod runner;
pub mod stage;
pub mod state;

pub use audit::{AuditDispatcher, AuditSink, InMemoryAuditStore, JsonlAuditStore, TracingAuditStore};
pub use graph::{CompiledGraph, Edge, GraphRun, Node, StateGraph, END};
pub use pipeline::{ApprovalPipeline, PipelineBuilder};
pub use runner::{WorkflowResult, WorkflowRunner};
pub use stage::StageRunner;
pub use state::WorkflowState;

use std::sync::Arc;

use tracing::info;

use tollgate_core::config::{AppConfig, StagesConfig};
use tollgate_core::error::{Result, TollgateError};
use tollgate_core::traits::{LookupProvider, StepExecutor};
use tollgate_core::types::{AuditAction, Stage, WorkflowStatus};
use tollgate_memory::SessionMemory;

use crate::audit::AuditSink;
use crate::graph::{CompiledGraph, GraphRun, Node, StateGraph, END};
use crate::stage::StageRunner;
use crate::state::WorkflowState;

/// Node names of the approval pipeline.
pub const MAKER: &str = "maker";
pub const CHECKER: &str = "checker";
pub const FULFILLMENT: &str = "fulfillment";
pub const REJECT: &str = "reject";

/// Routing labels produced after the maker and checker stages.
pub const APPROVED: &str = "approved";
pub const REJECTED: &str = "rejected";

/// The maker, checker, fulfillment approval workflow, with a shared
/// reject node reached from either decision stage.
///
/// Built once and reused for every work item; each run gets its own state.
pub struct ApprovalPipeline {
    graph: CompiledGraph<WorkflowState>,
    audit: AuditSink,
    sessions: Arc<SessionMemory>,
}

impl ApprovalPipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn graph(&self) -> &CompiledGraph<WorkflowState> {
        &self.graph
    }

    pub fn audit(&self) -> &AuditSink {
        &self.audit
    }

    pub fn sessions(&self) -> &Arc<SessionMemory> {
        &self.sessions
    }

    /// Run one work item through the graph.
    pub async fn invoke(&self, state: WorkflowState) -> Result<GraphRun<WorkflowState>> {
        self.graph.invoke_traced(state).await
    }
}

/// Builder for [`ApprovalPipeline`]. All three executors and an audit sink
/// are required.
#[derive(Default)]
pub struct PipelineBuilder {
    maker: Option<Arc<dyn StepExecutor>>,
    checker: Option<Arc<dyn StepExecutor>>,
    fulfillment: Option<Arc<dyn StepExecutor>>,
    audit: Option<AuditSink>,
    sessions: Option<Arc<SessionMemory>>,
    lookups: Option<Arc<dyn LookupProvider>>,
    stages: StagesConfig,
    step_limit: usize,
}

impl PipelineBuilder {
    pub fn maker(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.maker = Some(executor);
        self
    }

    pub fn checker(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.checker = Some(executor);
        self
    }

    pub fn fulfillment(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.fulfillment = Some(executor);
        self
    }

    pub fn audit(mut self, audit: AuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn sessions(mut self, sessions: Arc<SessionMemory>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Lookups offered to stages whose capability flag is set.
    pub fn lookups(mut self, provider: Arc<dyn LookupProvider>) -> Self {
        self.lookups = Some(provider);
        self
    }

    pub fn stages(mut self, stages: StagesConfig) -> Self {
        self.stages = stages;
        self
    }

    /// Node execution cap per run. 0 means the node count.
    pub fn step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Apply the stage and workflow sections of a loaded config.
    pub fn config(mut self, config: &AppConfig) -> Self {
        self.stages = config.stages.clone();
        self.step_limit = config.workflow.step_limit;
        self
    }

    pub fn build(self) -> Result<ApprovalPipeline> {
        self.build_with_routes(&[(APPROVED, CHECKER), (REJECTED, REJECT)])
    }

    /// Build with a custom label table after the maker stage.
    pub(crate) fn build_with_routes(
        self,
        maker_routes: &[(&str, &str)],
    ) -> Result<ApprovalPipeline> {
        let audit = self
            .audit
            .ok_or_else(|| TollgateError::GraphConfig("no audit sink configured".into()))?;
        let sessions = self.sessions.unwrap_or_default();

        let mut runners = Vec::with_capacity(3);
        for (stage, executor) in [
            (Stage::Maker, self.maker),
            (Stage::Checker, self.checker),
            (Stage::Fulfillment, self.fulfillment),
        ] {
            let executor = executor.ok_or_else(|| {
                TollgateError::GraphConfig(format!("no executor registered for stage '{stage}'"))
            })?;
            let runner = StageRunner::new(stage, executor, audit.clone(), Arc::clone(&sessions))
                .with_lookups(self.lookups.clone(), self.stages.get(stage));
            runners.push(Arc::new(runner));
        }
        let fulfillment = runners.pop();
        let checker = runners.pop();
        let maker = runners.pop();
        let (Some(maker), Some(checker), Some(fulfillment)) = (maker, checker, fulfillment) else {
            return Err(TollgateError::GraphConfig("stage runners missing".into()));
        };

        let mut graph = StateGraph::new();
        graph
            .add_node(stage_node(MAKER, maker))
            .add_node(stage_node(CHECKER, checker))
            .add_node(stage_node(FULFILLMENT, fulfillment))
            .add_node(reject_node(audit.clone()))
            .set_entry_point(MAKER)
            .add_conditional_edges(MAKER, route_on(Stage::Maker), maker_routes.iter().copied())
            .add_conditional_edges(
                CHECKER,
                route_on(Stage::Checker),
                [(APPROVED, FULFILLMENT), (REJECTED, REJECT)],
            )
            .add_edge(FULFILLMENT, END)
            .add_edge(REJECT, END);
        if self.step_limit > 0 {
            graph.with_step_limit(self.step_limit);
        }
        let graph = graph.compile()?;

        info!(
            nodes = ?graph.node_names(),
            step_limit = graph.step_limit(),
            "Approval pipeline ready"
        );
        Ok(ApprovalPipeline {
            graph,
            audit,
            sessions,
        })
    }
}

fn stage_node(name: &'static str, runner: Arc<StageRunner>) -> Node<WorkflowState> {
    Node::new(name, move |state: WorkflowState| {
        let runner = Arc::clone(&runner);
        async move {
            let stage = runner.stage();
            let mut state = runner.run(state).await;
            let status = state
                .outcome(stage)
                .map(|o| status_after(stage, o.approved, o.effect_succeeded()));
            if let Some(status) = status {
                state.status = status;
            }
            state
        }
    })
}

/// Lifecycle status once a stage has decided.
fn status_after(stage: Stage, approved: bool, effect_succeeded: bool) -> WorkflowStatus {
    match stage {
        Stage::Maker if approved => WorkflowStatus::UnderReview,
        Stage::Checker if approved => WorkflowStatus::Approved,
        Stage::Maker | Stage::Checker => WorkflowStatus::Rejected,
        Stage::Fulfillment if effect_succeeded => WorkflowStatus::Fulfilled,
        Stage::Fulfillment => WorkflowStatus::Failed,
    }
}

/// Router labelling a state by one stage's approved flag.
fn route_on(stage: Stage) -> impl Fn(&WorkflowState) -> String + Send + Sync + 'static {
    move |state: &WorkflowState| {
        let label = match state.outcome(stage) {
            Some(outcome) if outcome.approved => APPROVED,
            _ => REJECTED,
        };
        label.to_string()
    }
}

/// Terminal node for both decision stages. The first rejecting stage
/// explains the result; an outcome synthesized from an executor failure
/// makes the run `failed` rather than `rejected`.
fn reject_node(audit: AuditSink) -> Node<WorkflowState> {
    Node::sync(REJECT, move |mut state: WorkflowState| {
        let (status, message) = match state.first_rejection() {
            Some((stage, outcome)) if outcome.execution_error => (
                WorkflowStatus::Failed,
                format!(
                    "{} stage failed ({}): {}",
                    stage, outcome.actor, outcome.reasoning
                ),
            ),
            Some((stage, outcome)) => (
                WorkflowStatus::Rejected,
                format!(
                    "Rejected at {} stage by {}: {}",
                    stage, outcome.actor, outcome.reasoning
                ),
            ),
            None => (WorkflowStatus::Rejected, "Request rejected".to_string()),
        };

        state.status = status;
        state.set_str("rejection_message", message.clone());
        let id = state.work_item().id.clone();
        audit.emit(
            REJECT,
            "workflow",
            AuditAction::RequestRejected,
            message.clone(),
            &id,
            state.context_summary(),
        );
        state.error_message = Some(message);
        state
    })
}

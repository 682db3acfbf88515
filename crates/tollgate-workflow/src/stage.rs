use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use tollgate_core::config::StageConfig;
use tollgate_core::traits::{LookupProvider, StepExecutor, StepRequest};
use tollgate_core::types::{AuditAction, Stage, StageOutcome, Turn};
use tollgate_lookups::BudgetedLookups;
use tollgate_memory::SessionMemory;

use crate::audit::AuditSink;
use crate::state::WorkflowState;

/// Runs one stage's executor against the workflow state.
///
/// Owns the stage boundary: builds the executor's request from the state,
/// turns an executor failure into a rejecting outcome, records the outcome,
/// appends a session turn, and emits the stage's audit events.
pub struct StageRunner {
    stage: Stage,
    executor: Arc<dyn StepExecutor>,
    lookups: Option<Arc<dyn LookupProvider>>,
    max_lookup_calls: usize,
    audit: AuditSink,
    sessions: Arc<SessionMemory>,
}

impl StageRunner {
    pub fn new(
        stage: Stage,
        executor: Arc<dyn StepExecutor>,
        audit: AuditSink,
        sessions: Arc<SessionMemory>,
    ) -> Self {
        Self {
            stage,
            executor,
            lookups: None,
            max_lookup_calls: 0,
            audit,
            sessions,
        }
    }

    /// Grant access to auxiliary lookups if the stage's capability flag is set.
    pub fn with_lookups(
        mut self,
        provider: Option<Arc<dyn LookupProvider>>,
        config: &StageConfig,
    ) -> Self {
        if config.lookups_enabled {
            self.lookups = provider;
            self.max_lookup_calls = config.max_lookup_calls;
        } else {
            self.lookups = None;
        }
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn actor(&self) -> &str {
        self.executor.actor()
    }

    fn build_request(&self, state: &WorkflowState) -> StepRequest {
        let mut request = StepRequest::new(self.stage, state.work_item().clone());
        request.context = state.context().clone();
        request.prior_outcomes = state
            .outcomes()
            .into_iter()
            .map(|(stage, outcome)| (stage, outcome.clone()))
            .collect();
        request.history = self
            .sessions
            .get_or_create(&state.work_item().id)
            .turns()
            .cloned()
            .collect();
        request.lookups = self.lookups.as_ref().map(|provider| {
            Arc::new(BudgetedLookups::new(Arc::clone(provider), self.max_lookup_calls))
                as Arc<dyn LookupProvider>
        });
        request
    }

    /// Execute the stage. Never fails: executor errors become a rejecting
    /// outcome flagged as an execution error.
    pub async fn run(&self, mut state: WorkflowState) -> WorkflowState {
        let id = state.work_item().id.clone();
        let stage = self.stage.as_str();
        let actor = self.actor().to_string();

        info!(work_item_id = %id, stage, actor = %actor, "Executing stage");
        self.audit.emit(
            stage,
            &actor,
            AuditAction::ExecutionStarted,
            format!("Processing work item: {id}"),
            &id,
            state.context_summary(),
        );

        let request = self.build_request(&state);
        let request_summary = format!(
            "{} review of {} '{}'",
            stage,
            state.work_item().kind,
            state.work_item().summary
        );

        let start = Instant::now();
        let outcome = match self.executor.execute(request).await {
            Ok(outcome) => {
                info!(
                    work_item_id = %id,
                    stage,
                    approved = outcome.approved,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Stage decided"
                );
                self.audit.emit(
                    stage,
                    &actor,
                    AuditAction::ExecutionCompleted,
                    format!("Decision: {}", outcome.verdict()),
                    &id,
                    state.context_summary(),
                );
                outcome
            }
            Err(e) => {
                warn!(
                    work_item_id = %id,
                    stage,
                    actor = %actor,
                    error = %e,
                    "Stage execution failed"
                );
                self.audit.emit(
                    stage,
                    &actor,
                    AuditAction::ExecutionFailed,
                    format!("Error: {e}"),
                    &id,
                    state.context_summary(),
                );
                StageOutcome::execution_failed(&actor, e.to_string())
            }
        };

        self.sessions.append(
            &id,
            Turn::new(&actor, request_summary, outcome.reasoning.clone()),
        );
        if outcome.execution_error {
            state.error_message = Some(outcome.reasoning.clone());
        }
        state.record_outcome(self.stage, outcome);
        state
    }
}

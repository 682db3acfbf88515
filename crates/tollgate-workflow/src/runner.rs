use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use tollgate_core::error::Result;
use tollgate_core::types::{
    AuditAction, EffectStatus, Stage, StageOutcome, WorkItem, WorkItemId, WorkflowStatus,
};

use crate::pipeline::ApprovalPipeline;
use crate::state::WorkflowState;

/// What the caller of [`WorkflowRunner::submit`] gets back.
///
/// Outcome fields are present only for stages that actually ran.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub work_item_id: WorkItemId,
    pub final_status: WorkflowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maker_outcome: Option<StageOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checker_outcome: Option<StageOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fulfillment_outcome: Option<StageOutcome>,
    pub message: String,
}

impl WorkflowResult {
    fn from_state(state: &WorkflowState) -> Self {
        Self {
            work_item_id: state.work_item().id.clone(),
            final_status: state.status,
            maker_outcome: state.outcome(Stage::Maker).cloned(),
            checker_outcome: state.outcome(Stage::Checker).cloned(),
            fulfillment_outcome: state.outcome(Stage::Fulfillment).cloned(),
            message: result_message(state),
        }
    }

    /// Outcomes that are present, in execution order.
    pub fn outcomes(&self) -> Vec<(Stage, &StageOutcome)> {
        [
            (Stage::Maker, &self.maker_outcome),
            (Stage::Checker, &self.checker_outcome),
            (Stage::Fulfillment, &self.fulfillment_outcome),
        ]
        .into_iter()
        .filter_map(|(stage, outcome)| outcome.as_ref().map(|o| (stage, o)))
        .collect()
    }
}

fn result_message(state: &WorkflowState) -> String {
    let fulfillment = state.outcome(Stage::Fulfillment);
    match state.status {
        WorkflowStatus::Fulfilled => match fulfillment {
            Some(outcome) => format!("Work item fulfilled. {}", outcome.reasoning),
            None => "Work item fulfilled.".to_string(),
        },
        WorkflowStatus::Rejected => state
            .error_message
            .clone()
            .unwrap_or_else(|| "Request rejected".to_string()),
        WorkflowStatus::Failed => match (&state.error_message, fulfillment) {
            (Some(message), _) => message.clone(),
            (None, Some(outcome)) => match &outcome.effect {
                Some(EffectStatus::Failed { reason }) => {
                    format!("Fulfillment failed: {} ({reason})", outcome.reasoning)
                }
                _ => format!("Fulfillment failed: {}", outcome.reasoning),
            },
            (None, None) => "Workflow failed".to_string(),
        },
        other => format!("Process completed with status: {other}"),
    }
}

/// Entry point for running work items through an [`ApprovalPipeline`].
///
/// Business rejections and stage failures come back as `Ok` results with
/// status `rejected` or `failed`. Only graph definition problems (routing
/// errors, step limit) are returned as `Err`.
pub struct WorkflowRunner {
    pipeline: Arc<ApprovalPipeline>,
    clear_sessions: bool,
}

impl WorkflowRunner {
    pub fn new(pipeline: ApprovalPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            clear_sessions: false,
        }
    }

    /// Drop the work item's session once its run returns.
    pub fn clear_sessions_on_completion(mut self, clear: bool) -> Self {
        self.clear_sessions = clear;
        self
    }

    pub fn pipeline(&self) -> &ApprovalPipeline {
        &self.pipeline
    }

    /// Run one work item to completion.
    pub async fn submit(&self, item: WorkItem) -> Result<WorkflowResult> {
        let id = item.id.clone();
        info!(work_item_id = %id, kind = %item.kind, "Work item submitted");

        let audit = self.pipeline.audit();
        let outcome = self.pipeline.invoke(WorkflowState::new(item)).await;

        if self.clear_sessions {
            self.pipeline.sessions().clear(&id);
        }

        match outcome {
            Ok(run) => {
                let result = WorkflowResult::from_state(&run.state);
                info!(
                    work_item_id = %id,
                    status = %result.final_status,
                    path = ?run.path,
                    elapsed_ms = run.elapsed_ms,
                    "Work item finished"
                );
                audit.emit(
                    "workflow",
                    "workflow",
                    AuditAction::WorkflowCompleted,
                    format!("Final status: {}", result.final_status),
                    &id,
                    run.state.context_summary(),
                );
                Ok(result)
            }
            Err(e) => {
                error!(work_item_id = %id, error = %e, "Workflow aborted");
                audit.emit(
                    "workflow",
                    "workflow",
                    AuditAction::WorkflowAborted,
                    format!("Final status: {}: {e}", WorkflowStatus::Failed),
                    &id,
                    serde_json::json!({ "status": WorkflowStatus::Failed.as_str() }),
                );
                Err(e)
            }
        }
    }

    /// Run independent work items concurrently. Results keep input order.
    pub async fn submit_all(&self, items: Vec<WorkItem>) -> Vec<Result<WorkflowResult>> {
        futures::future::join_all(items.into_iter().map(|item| self.submit(item))).await
    }
}

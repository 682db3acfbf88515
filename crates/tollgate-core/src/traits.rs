use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::warn;

use crate::error::Result;
use crate::types::*;

/// Produces the decision for one stage.
///
/// Implementations own all decision logic. The workflow only routes on the
/// returned `approved` flag and never inspects the reasoning text.
pub trait StepExecutor: Send + Sync + 'static {
    /// Actor identifier recorded in audit records.
    fn actor(&self) -> &str;

    /// Decide on a work item. An `Err` is treated as a rejecting outcome.
    fn execute(&self, request: StepRequest) -> BoxFuture<'_, Result<StageOutcome>>;
}

/// Downstream destination for audit records.
pub trait AuditStore: Send + Sync + 'static {
    /// Store name, used in delivery-failure logs.
    fn name(&self) -> &str;

    /// Persist one record.
    fn persist(&self, record: AuditRecord) -> BoxFuture<'_, Result<()>>;
}

/// A single auxiliary lookup operation.
pub trait Lookup: Send + Sync + 'static {
    /// The one query kind this lookup answers.
    fn kind(&self) -> LookupKind;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Answer a query of this lookup's kind.
    fn run(&self, query: LookupQuery) -> BoxFuture<'_, Result<serde_json::Value>>;

    /// Per-lookup timeout override in seconds.
    fn timeout_secs(&self) -> Option<u64> {
        None
    }
}

/// Lookup access handed to a stage when its capability flag is set.
pub trait LookupProvider: Send + Sync + 'static {
    fn lookup(&self, query: LookupQuery) -> BoxFuture<'_, Result<serde_json::Value>>;
}

/// Everything a step executor receives for one stage invocation.
pub struct StepRequest {
    pub stage: Stage,
    pub work_item: WorkItem,
    /// Context accumulated by earlier stages.
    pub context: HashMap<String, serde_json::Value>,
    /// Outcomes of every earlier stage, in execution order.
    pub prior_outcomes: Vec<(Stage, StageOutcome)>,
    /// Prior turns remembered for this work item.
    pub history: Vec<Turn>,
    /// Present only when lookups are enabled for this stage.
    pub lookups: Option<Arc<dyn LookupProvider>>,
}

impl StepRequest {
    pub fn new(stage: Stage, work_item: WorkItem) -> Self {
        Self {
            stage,
            work_item,
            context: HashMap::new(),
            prior_outcomes: Vec::new(),
            history: Vec::new(),
            lookups: None,
        }
    }

    /// Outcome of an earlier stage, if it ran.
    pub fn prior(&self, stage: Stage) -> Option<&StageOutcome> {
        self.prior_outcomes
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, outcome)| outcome)
    }

    pub fn lookups_enabled(&self) -> bool {
        self.lookups.is_some()
    }

    /// Run an auxiliary lookup, degrading to `None` when lookups are disabled
    /// or the lookup fails.
    pub async fn try_lookup(&self, query: LookupQuery) -> Option<serde_json::Value> {
        let provider = self.lookups.as_ref()?;
        let kind = query.kind();
        match provider.lookup(query).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    stage = %self.stage,
                    work_item_id = %self.work_item.id,
                    lookup = %kind,
                    error = %e,
                    "Auxiliary lookup failed, continuing without it"
                );
                None
            }
        }
    }
}

impl fmt::Debug for StepRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRequest")
            .field("stage", &self.stage)
            .field("work_item", &self.work_item.id)
            .field("context_keys", &self.context.len())
            .field("prior_outcomes", &self.prior_outcomes.len())
            .field("history", &self.history.len())
            .field("lookups_enabled", &self.lookups_enabled())
            .finish()
    }
}

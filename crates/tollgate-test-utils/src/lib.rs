//! Shared test doubles for Tollgate crates: scripted step executors,
//! recording and misbehaving audit stores, and work item fixtures.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use tollgate_core::error::{Result, TollgateError};
use tollgate_core::traits::{AuditStore, StepExecutor, StepRequest};
use tollgate_core::types::*;

/// What a [`ScriptedExecutor`] observed about one request.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub work_item_id: WorkItemId,
    pub stage: Stage,
    pub prior_stages: Vec<Stage>,
    /// Context keys, sorted.
    pub context_keys: Vec<String>,
    pub history_len: usize,
    pub lookups_enabled: bool,
    /// Result of the probe lookup, if one was configured and succeeded.
    pub lookup_result: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
enum Reply {
    Approve,
    Reject(String),
    Fail(String),
}

/// Step executor returning a fixed decision and recording every call.
pub struct ScriptedExecutor {
    actor: String,
    reply: Reply,
    effect: Option<EffectStatus>,
    delay: Option<Duration>,
    probe: Option<LookupQuery>,
    calls: AtomicUsize,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedExecutor {
    fn with_reply(actor: &str, reply: Reply) -> Self {
        Self {
            actor: actor.to_string(),
            reply,
            effect: None,
            delay: None,
            probe: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn approving(actor: &str) -> Self {
        Self::with_reply(actor, Reply::Approve)
    }

    pub fn rejecting(actor: &str, reason: &str) -> Self {
        Self::with_reply(actor, Reply::Reject(reason.to_string()))
    }

    /// Executor whose call fails with a step execution error.
    pub fn failing(actor: &str, message: &str) -> Self {
        Self::with_reply(actor, Reply::Fail(message.to_string()))
    }

    /// Attach a side-effect report to approving outcomes.
    pub fn with_effect(mut self, effect: EffectStatus) -> Self {
        self.effect = Some(effect);
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Issue one auxiliary lookup per call and record its result.
    pub fn probing(mut self, query: LookupQuery) -> Self {
        self.probe = Some(query);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl StepExecutor for ScriptedExecutor {
    fn actor(&self) -> &str {
        &self.actor
    }

    fn execute(&self, request: StepRequest) -> BoxFuture<'_, Result<StageOutcome>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let lookup_result = match &self.probe {
                Some(query) => request.try_lookup(query.clone()).await,
                None => None,
            };

            let mut context_keys: Vec<String> = request.context.keys().cloned().collect();
            context_keys.sort();
            self.seen.lock().unwrap().push(SeenRequest {
                work_item_id: request.work_item.id.clone(),
                stage: request.stage,
                prior_stages: request.prior_outcomes.iter().map(|(s, _)| *s).collect(),
                context_keys,
                history_len: request.history.len(),
                lookups_enabled: request.lookups_enabled(),
                lookup_result,
            });

            match &self.reply {
                Reply::Approve => {
                    let outcome =
                        StageOutcome::approve(&self.actor, format!("Approved by {}", self.actor));
                    Ok(match &self.effect {
                        Some(effect) => outcome.with_effect(effect.clone()),
                        None => outcome,
                    })
                }
                Reply::Reject(reason) => Ok(StageOutcome::reject(&self.actor, reason.clone())),
                Reply::Fail(message) => Err(TollgateError::step(&self.actor, message.clone())),
            }
        })
    }
}

/// Audit store keeping every record it receives.
#[derive(Default)]
pub struct RecordingAuditStore {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn for_item(&self, id: &WorkItemId) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| &r.work_item_id == id)
            .collect()
    }

    /// Actions recorded for a work item, in delivery order.
    pub fn actions_for(&self, id: &WorkItemId) -> Vec<AuditAction> {
        self.for_item(id).into_iter().map(|r| r.action).collect()
    }
}

impl AuditStore for RecordingAuditStore {
    fn name(&self) -> &str {
        "recording"
    }

    fn persist(&self, record: AuditRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.records.lock().unwrap().push(record);
            Ok(())
        })
    }
}

/// Audit store that rejects every record.
pub struct FailingAuditStore;

impl AuditStore for FailingAuditStore {
    fn name(&self) -> &str {
        "failing"
    }

    fn persist(&self, _record: AuditRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Err(TollgateError::Audit("store unavailable".into())) })
    }
}

/// Audit store that takes `delay` to persist each record.
pub struct SlowAuditStore {
    pub delay: Duration,
}

impl AuditStore for SlowAuditStore {
    fn name(&self) -> &str {
        "slow"
    }

    fn persist(&self, _record: AuditRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(())
        })
    }
}

/// A complete refund work item.
pub fn refund_item(id: &str, amount: f64) -> WorkItem {
    WorkItem::new("refund", "Customer reports a duplicate charge")
        .with_id(id)
        .with_field("customer_id", serde_json::json!("CUST-1001"))
        .with_field("account_number", serde_json::json!("ACC-2002"))
        .with_field("amount", serde_json::json!(amount))
        .with_field("reason", serde_json::json!("duplicate charge"))
}

/// Write `content` to a temporary `.toml` file.
pub fn temp_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

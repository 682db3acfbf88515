use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique work item identifier. Also keys the work item's session.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(pub String);

impl WorkItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for WorkItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of work submitted for approval.
///
/// The payload is opaque to the workflow; only step executors interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(default)]
    pub id: WorkItemId,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub payload: HashMap<String, serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub submitted_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(kind: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: WorkItemId::new(),
            kind: kind.into(),
            summary: summary.into(),
            payload: HashMap::new(),
            submitted_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<WorkItemId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.payload.get(key)
    }

    /// Get a payload field as a non-empty string.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn field_f64(&self, key: &str) -> Option<f64> {
        self.payload.get(key).and_then(|v| v.as_f64())
    }
}

/// One of the three sequential decision stages.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Stage A: proposes a decision.
    Maker,
    /// Stage B: validates (and may override) the maker's decision.
    Checker,
    /// Stage C: carries out the approved work.
    Fulfillment,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 3] = [Stage::Maker, Stage::Checker, Stage::Fulfillment];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Maker => "maker",
            Self::Checker => "checker",
            Self::Fulfillment => "fulfillment",
        }
    }

    /// Context key under which this stage's serialized outcome is stored.
    pub fn context_key(&self) -> String {
        format!("{}_outcome", self.as_str())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a side effect carried out by a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EffectStatus {
    Succeeded,
    Failed { reason: String },
}

/// The decision produced by one stage. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub actor: String,
    pub approved: bool,
    pub reasoning: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Side-effect report, only meaningful for the fulfillment stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<EffectStatus>,
    /// Set when the outcome was synthesized from a failed executor call.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub execution_error: bool,
    pub timestamp: DateTime<Utc>,
}

impl StageOutcome {
    fn decided(actor: impl Into<String>, approved: bool, reasoning: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            approved,
            reasoning: reasoning.into(),
            metadata: HashMap::new(),
            effect: None,
            execution_error: false,
            timestamp: Utc::now(),
        }
    }

    pub fn approve(actor: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self::decided(actor, true, reasoning)
    }

    pub fn reject(actor: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self::decided(actor, false, reasoning)
    }

    /// A rejecting outcome standing in for an executor that failed.
    pub fn execution_failed(actor: impl Into<String>, error: impl Into<String>) -> Self {
        let mut outcome = Self::decided(actor, false, error);
        outcome.execution_error = true;
        outcome
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_effect(mut self, effect: EffectStatus) -> Self {
        self.effect = Some(effect);
        self
    }

    /// Approved, and the side effect (if reported) did not fail.
    pub fn effect_succeeded(&self) -> bool {
        self.approved && !matches!(self.effect, Some(EffectStatus::Failed { .. }))
    }

    pub fn verdict(&self) -> &'static str {
        if self.approved {
            "APPROVED"
        } else {
            "REJECTED"
        }
    }
}

/// Lifecycle status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowStatus {
    #[default]
    UnderReview,
    Approved,
    Rejected,
    Fulfilled,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnderReview => "under-review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Fulfilled => "fulfilled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request/response exchange remembered for a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub actor: String,
    pub request: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(
        actor: impl Into<String>,
        request: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            actor: actor.into(),
            request: request.into(),
            response: response.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Action tag carried by an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionFailed,
    RequestRejected,
    WorkflowCompleted,
    WorkflowAborted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecutionStarted => "EXECUTION_STARTED",
            Self::ExecutionCompleted => "EXECUTION_COMPLETED",
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::RequestRejected => "REQUEST_REJECTED",
            Self::WorkflowCompleted => "WORKFLOW_COMPLETED",
            Self::WorkflowAborted => "WORKFLOW_ABORTED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write-once audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub work_item_id: WorkItemId,
    pub stage: String,
    pub actor: String,
    pub action: AuditAction,
    pub details: String,
    /// Summary of the workflow context at emission time.
    pub context: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        stage: impl Into<String>,
        actor: impl Into<String>,
        action: AuditAction,
        details: impl Into<String>,
        work_item_id: WorkItemId,
        context: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            work_item_id,
            stage: stage.into(),
            actor: actor.into(),
            action,
            details: details.into(),
            context,
            timestamp: Utc::now(),
        }
    }
}

/// The finite set of auxiliary lookups a stage may consult.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupKind {
    TransactionHistory,
    SimilarRequests,
    AccountActivity,
    RiskMarkers,
    RelationshipHistory,
    RepaymentAnalysis,
}

impl LookupKind {
    pub const ALL: [LookupKind; 6] = [
        LookupKind::TransactionHistory,
        LookupKind::SimilarRequests,
        LookupKind::AccountActivity,
        LookupKind::RiskMarkers,
        LookupKind::RelationshipHistory,
        LookupKind::RepaymentAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransactionHistory => "transaction_history",
            Self::SimilarRequests => "similar_requests",
            Self::AccountActivity => "account_activity",
            Self::RiskMarkers => "risk_markers",
            Self::RelationshipHistory => "relationship_history",
            Self::RepaymentAnalysis => "repayment_analysis",
        }
    }
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed auxiliary lookup request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "lookup", rename_all = "snake_case")]
pub enum LookupQuery {
    TransactionHistory { customer_id: String, months: u32 },
    SimilarRequests { account_number: String, days: u32 },
    AccountActivity { account_number: String, days: u32 },
    RiskMarkers {
        customer_id: String,
        account_number: String,
        marker: String,
    },
    RelationshipHistory { customer_id: String },
    RepaymentAnalysis { account_number: String },
}

impl LookupQuery {
    pub fn kind(&self) -> LookupKind {
        match self {
            Self::TransactionHistory { .. } => LookupKind::TransactionHistory,
            Self::SimilarRequests { .. } => LookupKind::SimilarRequests,
            Self::AccountActivity { .. } => LookupKind::AccountActivity,
            Self::RiskMarkers { .. } => LookupKind::RiskMarkers,
            Self::RelationshipHistory { .. } => LookupKind::RelationshipHistory,
            Self::RepaymentAnalysis { .. } => LookupKind::RepaymentAnalysis,
        }
    }
}

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use tollgate_core::types::{Stage, StageOutcome, WorkItem, WorkflowStatus};

/// Longest value preview kept in an audit context summary.
const PREVIEW_CHARS: usize = 120;

/// State threaded through every node of one workflow run.
///
/// Created once per work item and dropped when the run returns. The work
/// item is fixed at construction. An outcome exists for a stage exactly when
/// that stage's node has run, and outcomes are never removed.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    work_item: WorkItem,
    outcomes: BTreeMap<Stage, StageOutcome>,
    #[serde(skip)]
    order: Vec<Stage>,
    pub status: WorkflowStatus,
    pub error_message: Option<String>,
    context: HashMap<String, serde_json::Value>,
}

impl WorkflowState {
    pub fn new(work_item: WorkItem) -> Self {
        Self {
            work_item,
            outcomes: BTreeMap::new(),
            order: Vec::new(),
            status: WorkflowStatus::UnderReview,
            error_message: None,
            context: HashMap::new(),
        }
    }

    pub fn work_item(&self) -> &WorkItem {
        &self.work_item
    }

    /// Record a stage's outcome and publish it to the context under
    /// `"<stage>_outcome"` so later stages can read it.
    pub fn record_outcome(&mut self, stage: Stage, outcome: StageOutcome) {
        if let Ok(value) = serde_json::to_value(&outcome) {
            self.context.insert(stage.context_key(), value);
        }
        if self.outcomes.insert(stage, outcome).is_none() {
            self.order.push(stage);
        }
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.outcomes.get(&stage)
    }

    pub fn has_outcome(&self, stage: Stage) -> bool {
        self.outcomes.contains_key(&stage)
    }

    /// Outcomes in the order their stages executed.
    pub fn outcomes(&self) -> Vec<(Stage, &StageOutcome)> {
        self.order
            .iter()
            .filter_map(|stage| self.outcomes.get(stage).map(|o| (*stage, o)))
            .collect()
    }

    /// First executed stage whose outcome rejected, if any.
    pub fn first_rejection(&self) -> Option<(Stage, &StageOutcome)> {
        self.outcomes().into_iter().find(|(_, o)| !o.approved)
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.context.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(|v| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.insert(key.into(), value);
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.context
            .insert(key.into(), serde_json::Value::String(value.into()));
    }

    /// Merge a map into the context, overwriting on conflict.
    pub fn merge(&mut self, other: &HashMap<String, serde_json::Value>) {
        for (k, v) in other {
            self.context.insert(k.clone(), v.clone());
        }
    }

    pub fn context(&self) -> &HashMap<String, serde_json::Value> {
        &self.context
    }

    /// Compact view of the context for audit records: sorted keys and a
    /// truncated preview of each value.
    pub fn context_summary(&self) -> serde_json::Value {
        let mut keys: Vec<&String> = self.context.keys().collect();
        keys.sort();

        let previews: serde_json::Map<String, serde_json::Value> = keys
            .iter()
            .map(|k| {
                let raw = match &self.context[*k] {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                ((*k).clone(), serde_json::Value::String(truncate(&raw)))
            })
            .collect();

        serde_json::json!({
            "status": self.status.as_str(),
            "keys": keys,
            "values": previews,
        })
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= PREVIEW_CHARS {
        s.to_string()
    } else {
        let cut: String = s.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> WorkflowState {
        WorkflowState::new(WorkItem::new("refund", "Duplicate charge").with_id("REQ-9"))
    }

    #[test]
    fn starts_under_review_and_empty() {
        let s = state();
        assert_eq!(s.status, WorkflowStatus::UnderReview);
        assert!(s.outcomes().is_empty());
        assert!(s.context().is_empty());
        assert_eq!(s.work_item().id.as_str(), "REQ-9");
    }

    #[test]
    fn outcomes_keep_execution_order_and_publish_context() {
        let mut s = state();
        s.record_outcome(Stage::Maker, StageOutcome::approve("maker", "ok"));
        s.record_outcome(Stage::Checker, StageOutcome::reject("checker", "limit"));

        let stages: Vec<Stage> = s.outcomes().into_iter().map(|(st, _)| st).collect();
        assert_eq!(stages, vec![Stage::Maker, Stage::Checker]);
        assert!(s.has_outcome(Stage::Maker));
        assert!(!s.has_outcome(Stage::Fulfillment));

        let published = s.get("maker_outcome").unwrap();
        assert_eq!(published["approved"], true);
        assert_eq!(published["actor"], "maker");
    }

    #[test]
    fn first_rejection_wins() {
        let mut s = state();
        s.record_outcome(Stage::Maker, StageOutcome::reject("maker", "missing fields"));
        s.record_outcome(Stage::Checker, StageOutcome::reject("checker", "also no"));
        let (stage, outcome) = s.first_rejection().unwrap();
        assert_eq!(stage, Stage::Maker);
        assert_eq!(outcome.reasoning, "missing fields");
    }

    #[test]
    fn context_helpers() {
        let mut s = state();
        s.set_str("channel", "branch");
        s.set("score", serde_json::json!(7));
        let mut extra = HashMap::new();
        extra.insert("score".to_string(), serde_json::json!(9));
        s.merge(&extra);

        assert_eq!(s.get_str("channel"), Some("branch"));
        assert_eq!(s.get("score"), Some(&serde_json::json!(9)));
        assert_eq!(s.get_str("score"), None);
    }

    #[test]
    fn summary_truncates_long_values() {
        let mut s = state();
        s.set_str("notes", "x".repeat(500));
        s.set_str("a", "short");
        let summary = s.context_summary();

        assert_eq!(summary["keys"], serde_json::json!(["a", "notes"]));
        let notes = summary["values"]["notes"].as_str().unwrap();
        assert!(notes.ends_with("..."));
        assert_eq!(notes.chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(summary["status"], "under-review");
    }
}

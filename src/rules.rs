//! Rule-based step executors used by the CLI.
//!
//! They stand in for real decision services: the maker validates a refund
//! request against fixed policy, the checker re-verifies the maker's
//! decision, and fulfillment simulates posting the refund to a ledger.

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::debug;

use tollgate_core::config::RulesConfig;
use tollgate_core::error::{Result, TollgateError};
use tollgate_core::traits::{StepExecutor, StepRequest};
use tollgate_core::types::{EffectStatus, LookupQuery, Stage, StageOutcome};

/// Checks required fields, amount limit, and reason against policy.
pub struct PolicyMaker {
    actor: String,
    rules: RulesConfig,
}

impl PolicyMaker {
    pub fn new(actor: impl Into<String>, rules: RulesConfig) -> Self {
        Self {
            actor: actor.into(),
            rules,
        }
    }

    fn missing_fields(&self, request: &StepRequest) -> Vec<String> {
        self.rules
            .required_fields
            .iter()
            .filter(|field| match request.work_item.field(field) {
                Some(serde_json::Value::String(s)) => s.trim().is_empty(),
                Some(serde_json::Value::Null) | None => true,
                Some(_) => false,
            })
            .cloned()
            .collect()
    }
}

impl StepExecutor for PolicyMaker {
    fn actor(&self) -> &str {
        &self.actor
    }

    fn execute(&self, request: StepRequest) -> BoxFuture<'_, Result<StageOutcome>> {
        Box::pin(async move {
            let item = &request.work_item;

            let missing = self.missing_fields(&request);
            if !missing.is_empty() {
                return Ok(StageOutcome::reject(
                    &self.actor,
                    format!("Missing required fields: {}", missing.join(", ")),
                ));
            }

            let amount = match item.field_f64("amount") {
                Some(a) if a > 0.0 => a,
                _ => {
                    return Ok(StageOutcome::reject(
                        &self.actor,
                        "Amount must be a positive number",
                    ))
                }
            };
            if amount > self.rules.max_amount {
                return Ok(StageOutcome::reject(
                    &self.actor,
                    format!(
                        "Amount {amount:.2} exceeds the limit of {:.2}",
                        self.rules.max_amount
                    ),
                ));
            }

            let reason = item.field_str("reason").unwrap_or_default().to_lowercase();
            if !self.rules.valid_reasons.iter().any(|r| r.eq_ignore_ascii_case(&reason)) {
                return Ok(StageOutcome::reject(
                    &self.actor,
                    format!("Unsupported refund reason: {reason}"),
                ));
            }

            let customer_id = item.field_str("customer_id").unwrap_or_default().to_string();
            let account_number = item.field_str("account_number").unwrap_or_default().to_string();

            let risk = request
                .try_lookup(LookupQuery::RiskMarkers {
                    customer_id,
                    account_number: account_number.clone(),
                    marker: "fraud".into(),
                })
                .await;
            if risk
                .as_ref()
                .and_then(|v| v["result"]["flagged"].as_bool())
                .unwrap_or(false)
            {
                return Ok(StageOutcome::reject(
                    &self.actor,
                    "Account carries an active fraud marker",
                ));
            }

            let similar = request
                .try_lookup(LookupQuery::SimilarRequests {
                    account_number,
                    days: 30,
                })
                .await
                .and_then(|v| v["result"]["similar_count"].as_u64())
                .unwrap_or(0);

            debug!(work_item_id = %item.id, amount, similar, "Maker checks passed");
            Ok(StageOutcome::approve(
                &self.actor,
                format!("All validation checks passed for a {reason} refund of {amount:.2}"),
            )
            .with_metadata("amount", serde_json::json!(amount))
            .with_metadata("similar_requests", serde_json::json!(similar)))
        })
    }
}

/// Re-verifies the maker's decision. Its verdict is final.
pub struct PolicyChecker {
    actor: String,
    rules: RulesConfig,
}

impl PolicyChecker {
    pub fn new(actor: impl Into<String>, rules: RulesConfig) -> Self {
        Self {
            actor: actor.into(),
            rules,
        }
    }
}

impl StepExecutor for PolicyChecker {
    fn actor(&self) -> &str {
        &self.actor
    }

    fn execute(&self, request: StepRequest) -> BoxFuture<'_, Result<StageOutcome>> {
        Box::pin(async move {
            let maker = request
                .prior(Stage::Maker)
                .ok_or_else(|| TollgateError::step(&self.actor, "no maker decision to review"))?;

            if !maker.approved {
                return Ok(StageOutcome::reject(
                    &self.actor,
                    format!("Upholding maker rejection: {}", maker.reasoning),
                ));
            }

            let amount = request.work_item.field_f64("amount").unwrap_or(0.0);
            if amount > self.rules.max_amount {
                return Ok(StageOutcome::reject(
                    &self.actor,
                    format!("Overriding maker: amount {amount:.2} is over the limit"),
                ));
            }

            let similar = maker
                .metadata
                .get("similar_requests")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            if similar > 0 {
                return Ok(StageOutcome::reject(
                    &self.actor,
                    format!("Overriding maker: {similar} similar refund(s) in the last 30 days"),
                ));
            }

            if let Some(customer_id) = request.work_item.field_str("customer_id") {
                let tenure = request
                    .try_lookup(LookupQuery::RelationshipHistory {
                        customer_id: customer_id.to_string(),
                    })
                    .await
                    .and_then(|v| v["result"]["account_age_months"].as_u64());
                if matches!(tenure, Some(months) if months < 3)
                    && amount > self.rules.max_amount / 2.0
                {
                    return Ok(StageOutcome::reject(
                        &self.actor,
                        "Overriding maker: new relationship with a large refund needs manual review",
                    ));
                }
            }

            Ok(StageOutcome::approve(
                &self.actor,
                format!("Verified maker decision: {}", maker.reasoning),
            ))
        })
    }
}

/// Simulates posting the approved refund to the ledger.
pub struct LedgerFulfillment {
    actor: String,
    fail: bool,
}

impl LedgerFulfillment {
    pub fn new(actor: impl Into<String>, rules: &RulesConfig) -> Self {
        Self {
            actor: actor.into(),
            fail: rules.fail_fulfillment,
        }
    }
}

impl StepExecutor for LedgerFulfillment {
    fn actor(&self) -> &str {
        &self.actor
    }

    fn execute(&self, request: StepRequest) -> BoxFuture<'_, Result<StageOutcome>> {
        Box::pin(async move {
            let item = &request.work_item;
            let amount = item.field_f64("amount").unwrap_or(0.0);
            let account = item.field_str("account_number").unwrap_or("unknown");

            if self.fail {
                return Ok(StageOutcome::approve(
                    &self.actor,
                    format!("Refund of {amount:.2} to account {account} could not be posted"),
                )
                .with_effect(EffectStatus::Failed {
                    reason: "ledger rejected the posting".into(),
                }));
            }

            let transaction_id = format!("TXN-{}", Utc::now().timestamp_millis());
            Ok(StageOutcome::approve(
                &self.actor,
                format!("Refunded {amount:.2} to account {account} ({transaction_id})"),
            )
            .with_metadata("transaction_id", serde_json::json!(transaction_id))
            .with_effect(EffectStatus::Succeeded))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::types::WorkItem;

    fn request(stage: Stage, item: WorkItem) -> StepRequest {
        StepRequest::new(stage, item)
    }

    fn refund(amount: f64, reason: &str) -> WorkItem {
        WorkItem::new("refund", "test")
            .with_field("customer_id", serde_json::json!("C1"))
            .with_field("account_number", serde_json::json!("A1"))
            .with_field("amount", serde_json::json!(amount))
            .with_field("reason", serde_json::json!(reason))
    }

    #[tokio::test]
    async fn maker_approves_valid_request() {
        let maker = PolicyMaker::new("maker", RulesConfig::default());
        let outcome = maker
            .execute(request(Stage::Maker, refund(120.0, "Duplicate Charge")))
            .await
            .unwrap();
        assert!(outcome.approved, "{}", outcome.reasoning);
    }

    #[tokio::test]
    async fn maker_rejects_missing_fields() {
        let maker = PolicyMaker::new("maker", RulesConfig::default());
        let item = WorkItem::new("refund", "test").with_field("amount", serde_json::json!(5));
        let outcome = maker.execute(request(Stage::Maker, item)).await.unwrap();
        assert!(!outcome.approved);
        assert!(outcome.reasoning.contains("customer_id"));
        assert!(!outcome.reasoning.contains("amount"));
    }

    #[tokio::test]
    async fn maker_rejects_over_limit_and_bad_reason() {
        let maker = PolicyMaker::new("maker", RulesConfig::default());
        let over = maker
            .execute(request(Stage::Maker, refund(25_000.0, "overpayment")))
            .await
            .unwrap();
        assert!(over.reasoning.contains("exceeds"));

        let odd = maker
            .execute(request(Stage::Maker, refund(10.0, "changed my mind")))
            .await
            .unwrap();
        assert!(odd.reasoning.contains("Unsupported"));
    }

    #[tokio::test]
    async fn checker_requires_maker_outcome() {
        let checker = PolicyChecker::new("checker", RulesConfig::default());
        let err = checker
            .execute(request(Stage::Checker, refund(10.0, "overpayment")))
            .await
            .unwrap_err();
        assert!(matches!(err, TollgateError::StepExecution { .. }));
    }

    #[tokio::test]
    async fn checker_overrides_on_similar_requests() {
        let checker = PolicyChecker::new("checker", RulesConfig::default());
        let mut req = request(Stage::Checker, refund(10.0, "overpayment"));
        req.prior_outcomes.push((
            Stage::Maker,
            StageOutcome::approve("maker", "ok")
                .with_metadata("similar_requests", serde_json::json!(2)),
        ));
        let outcome = checker.execute(req).await.unwrap();
        assert!(!outcome.approved);
        assert!(outcome.reasoning.contains("2 similar"));
    }

    #[tokio::test]
    async fn fulfillment_reports_effect() {
        let ok = LedgerFulfillment::new("ledger", &RulesConfig::default());
        let outcome = ok
            .execute(request(Stage::Fulfillment, refund(10.0, "overpayment")))
            .await
            .unwrap();
        assert!(outcome.effect_succeeded());

        let rules = RulesConfig {
            fail_fulfillment: true,
            ..RulesConfig::default()
        };
        let broken = LedgerFulfillment::new("ledger", &rules);
        let outcome = broken
            .execute(request(Stage::Fulfillment, refund(10.0, "overpayment")))
            .await
            .unwrap();
        assert!(outcome.approved);
        assert!(!outcome.effect_succeeded());
    }
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::warn;

use tollgate_core::error::{Result, TollgateError};
use tollgate_core::traits::LookupProvider;
use tollgate_core::types::LookupQuery;

/// Per-invocation view of a lookup provider.
///
/// Allows at most `max_calls` lookups and runs them one at a time, so a
/// stage cannot fan out or recurse through its auxiliary lookups.
pub struct BudgetedLookups {
    inner: Arc<dyn LookupProvider>,
    max_calls: usize,
    used: AtomicUsize,
    serial: Mutex<()>,
}

impl BudgetedLookups {
    pub fn new(inner: Arc<dyn LookupProvider>, max_calls: usize) -> Self {
        Self {
            inner,
            max_calls,
            used: AtomicUsize::new(0),
            serial: Mutex::new(()),
        }
    }

    pub fn calls_used(&self) -> usize {
        self.used.load(Ordering::SeqCst).min(self.max_calls)
    }

    pub fn remaining(&self) -> usize {
        self.max_calls - self.calls_used()
    }
}

impl LookupProvider for BudgetedLookups {
    fn lookup(&self, query: LookupQuery) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let _guard = self.serial.lock().await;
            if self.used.fetch_add(1, Ordering::SeqCst) >= self.max_calls {
                warn!(
                    lookup = %query.kind(),
                    max_calls = self.max_calls,
                    "Lookup budget exhausted"
                );
                return Err(TollgateError::LookupBudgetExhausted(self.max_calls));
            }
            self.inner.lookup(query).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl LookupProvider for Echo {
        fn lookup(&self, query: LookupQuery) -> BoxFuture<'_, Result<serde_json::Value>> {
            Box::pin(async move { Ok(serde_json::to_value(&query)?) })
        }
    }

    fn query() -> LookupQuery {
        LookupQuery::RelationshipHistory {
            customer_id: "C1".into(),
        }
    }

    #[tokio::test]
    async fn allows_calls_up_to_budget() {
        let budget = BudgetedLookups::new(Arc::new(Echo), 2);
        assert!(budget.lookup(query()).await.is_ok());
        assert!(budget.lookup(query()).await.is_ok());
        assert_eq!(budget.remaining(), 0);

        let err = budget.lookup(query()).await.unwrap_err();
        assert!(matches!(err, TollgateError::LookupBudgetExhausted(2)));
        assert_eq!(budget.calls_used(), 2);
    }

    #[tokio::test]
    async fn zero_budget_rejects_everything() {
        let budget = BudgetedLookups::new(Arc::new(Echo), 0);
        assert!(budget.lookup(query()).await.is_err());
    }
}

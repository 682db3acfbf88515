use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use tollgate_core::error::{Result, TollgateError};
use tollgate_core::traits::{Lookup, LookupProvider};
use tollgate_core::types::{LookupKind, LookupQuery};

/// Registry of auxiliary lookups, at most one per [`LookupKind`].
pub struct LookupRegistry {
    lookups: HashMap<LookupKind, Arc<dyn Lookup>>,
    default_timeout: Duration,
}

impl LookupRegistry {
    pub fn new() -> Self {
        Self {
            lookups: HashMap::new(),
            default_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a lookup, replacing any previous one of the same kind.
    pub fn register(&mut self, lookup: impl Lookup) {
        self.lookups.insert(lookup.kind(), Arc::new(lookup));
    }

    /// Unregister a lookup by kind.
    pub fn unregister(&mut self, kind: LookupKind) -> bool {
        self.lookups.remove(&kind).is_some()
    }

    pub fn get(&self, kind: LookupKind) -> Option<Arc<dyn Lookup>> {
        self.lookups.get(&kind).cloned()
    }

    /// Registered kinds, in declaration order.
    pub fn kinds(&self) -> Vec<LookupKind> {
        LookupKind::ALL
            .into_iter()
            .filter(|k| self.lookups.contains_key(k))
            .collect()
    }

    /// Registered kinds with their descriptions, in declaration order.
    pub fn descriptions(&self) -> Vec<(LookupKind, String)> {
        self.kinds()
            .into_iter()
            .filter_map(|k| {
                self.lookups
                    .get(&k)
                    .map(|l| (k, l.description().to_string()))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lookups.is_empty()
    }

    /// Run a query against its registered lookup, bounded by a timeout.
    pub async fn run(&self, query: LookupQuery) -> Result<serde_json::Value> {
        let kind = query.kind();
        let lookup = self
            .get(kind)
            .ok_or_else(|| TollgateError::LookupNotRegistered(kind.to_string()))?;

        let timeout = lookup
            .timeout_secs()
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        debug!(lookup = %kind, "Running auxiliary lookup");
        match tokio::time::timeout(timeout, lookup.run(query)).await {
            Ok(result) => result,
            Err(_) => Err(TollgateError::LookupTimeout {
                lookup: kind.to_string(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}

impl Default for LookupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LookupProvider for LookupRegistry {
    fn lookup(&self, query: LookupQuery) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(self.run(query))
    }
}

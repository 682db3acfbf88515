use std::path::Path;

use futures::future::BoxFuture;

use tollgate_core::error::{Result, TollgateError};
use tollgate_core::traits::Lookup;
use tollgate_core::types::{LookupKind, LookupQuery};

use crate::registry::LookupRegistry;

/// Lookup answering every query of its kind with a canned response.
///
/// Used for demos and tests where the real business systems are absent.
pub struct FixtureLookup {
    kind: LookupKind,
    response: serde_json::Value,
}

impl FixtureLookup {
    pub fn new(kind: LookupKind, response: serde_json::Value) -> Self {
        Self { kind, response }
    }
}

impl Lookup for FixtureLookup {
    fn kind(&self) -> LookupKind {
        self.kind
    }

    fn description(&self) -> &str {
        "Canned lookup response"
    }

    fn run(&self, query: LookupQuery) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            if query.kind() != self.kind {
                return Err(TollgateError::Lookup {
                    lookup: self.kind.to_string(),
                    message: format!("cannot answer a {} query", query.kind()),
                });
            }
            Ok(serde_json::json!({
                "query": query,
                "result": self.response,
            }))
        })
    }
}

/// Parse a fixtures document: a JSON object keyed by lookup kind
/// (`"risk_markers"`, `"transaction_history"`, ...).
pub fn parse_fixtures(json: &str) -> Result<Vec<FixtureLookup>> {
    let doc: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)?;
    let mut lookups = Vec::with_capacity(doc.len());
    for (key, response) in doc {
        let kind: LookupKind = serde_json::from_value(serde_json::Value::String(key.clone()))
            .map_err(|_| TollgateError::Config(format!("unknown lookup kind in fixtures: {key}")))?;
        lookups.push(FixtureLookup::new(kind, response));
    }
    Ok(lookups)
}

impl LookupRegistry {
    /// Build a registry serving canned responses from a fixtures file.
    pub fn from_fixtures_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| TollgateError::ConfigNotFound(path.display().to_string()))?;
        let mut registry = Self::new();
        for lookup in parse_fixtures(&content)? {
            registry.register(lookup);
        }
        Ok(registry)
    }
}

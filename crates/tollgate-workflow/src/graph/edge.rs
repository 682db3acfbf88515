use std::collections::HashMap;
use std::sync::Arc;

use tollgate_core::error::{Result, TollgateError};

/// Reserved target name that terminates a run.
pub const END: &str = "__end__";

/// Routing function for a conditional edge: inspects the state and returns a label.
pub type Router<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

/// Outgoing transition of a node. A node has at most one.
pub enum Edge<S> {
    /// Always continue to `to`.
    Fixed { to: String },
    /// Ask the router for a label and continue to `routes[label]`.
    Conditional {
        router: Router<S>,
        routes: HashMap<String, String>,
    },
}

impl<S> Edge<S> {
    /// Create an unconditional edge.
    pub fn fixed(to: impl Into<String>) -> Self {
        Self::Fixed { to: to.into() }
    }

    /// Create a conditional edge from a router and a label table.
    pub fn conditional<F, I, K, V>(router: F, routes: I) -> Self
    where
        F: Fn(&S) -> String + Send + Sync + 'static,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Conditional {
            router: Arc::new(router),
            routes: routes
                .into_iter()
                .map(|(label, target)| (label.into(), target.into()))
                .collect(),
        }
    }

    /// Every node this edge can lead to, `END` included.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Self::Fixed { to } => vec![to.as_str()],
            Self::Conditional { routes, .. } => {
                let mut targets: Vec<&str> = routes.values().map(String::as_str).collect();
                targets.sort_unstable();
                targets.dedup();
                targets
            }
        }
    }

    /// Resolve the next node for `state`, leaving `from`.
    pub fn resolve(&self, from: &str, state: &S) -> Result<String> {
        match self {
            Self::Fixed { to } => Ok(to.clone()),
            Self::Conditional { router, routes } => {
                let label = router(state);
                routes
                    .get(&label)
                    .cloned()
                    .ok_or_else(|| TollgateError::Routing {
                        node: from.to_string(),
                        label,
                    })
            }
        }
    }
}

impl<S> Clone for Edge<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Fixed { to } => Self::Fixed { to: to.clone() },
            Self::Conditional { router, routes } => Self::Conditional {
                router: Arc::clone(router),
                routes: routes.clone(),
            },
        }
    }
}

impl<S> std::fmt::Debug for Edge<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed { to } => f.debug_struct("Fixed").field("to", to).finish(),
            Self::Conditional { routes, .. } => f
                .debug_struct("Conditional")
                .field("routes", routes)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parity() -> Edge<u32> {
        Edge::conditional(
            |n: &u32| if n % 2 == 0 { "even" } else { "odd" }.to_string(),
            [("even", "halve"), ("odd", END)],
        )
    }

    #[test]
    fn fixed_edge_always_resolves() {
        let edge: Edge<u32> = Edge::fixed("next");
        assert_eq!(edge.resolve("start", &7).unwrap(), "next");
        assert_eq!(edge.targets(), vec!["next"]);
    }

    #[test]
    fn conditional_edge_follows_label() {
        let edge = parity();
        assert_eq!(edge.resolve("check", &4).unwrap(), "halve");
        assert_eq!(edge.resolve("check", &3).unwrap(), END);
    }

    #[test]
    fn unknown_label_is_routing_error() {
        let edge: Edge<u32> = Edge::conditional(|_: &u32| "maybe".to_string(), [("yes", "a")]);
        let err = edge.resolve("decide", &1).unwrap_err();
        match err {
            TollgateError::Routing { node, label } => {
                assert_eq!(node, "decide");
                assert_eq!(label, "maybe");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn targets_are_deduplicated() {
        let edge: Edge<u32> = Edge::conditional(
            |_: &u32| String::new(),
            [("a", "reject"), ("b", "reject"), ("c", "accept")],
        );
        assert_eq!(edge.targets(), vec!["accept", "reject"]);
    }
}

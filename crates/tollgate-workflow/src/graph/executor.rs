use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info, warn};

use tollgate_core::error::{Result, TollgateError};

use super::edge::{Edge, END};
use super::node::Node;

/// Workflow definition under construction.
///
/// Definition mistakes (duplicate nodes, two outgoing edges on one node,
/// edges to unknown nodes) are collected as they happen and reported
/// together by [`StateGraph::compile`].
pub struct StateGraph<S> {
    nodes: HashMap<String, Node<S>>,
    edges: HashMap<String, Edge<S>>,
    entry_point: Option<String>,
    step_limit: Option<usize>,
    problems: Vec<String>,
}

impl<S: Send + 'static> StateGraph<S> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            entry_point: None,
            step_limit: None,
            problems: Vec::new(),
        }
    }

    /// Register a node. Names must be unique and must not be `END`.
    pub fn add_node(&mut self, node: Node<S>) -> &mut Self {
        let name = node.name().to_string();
        if name == END {
            self.problems
                .push(format!("'{END}' is reserved and cannot name a node"));
        } else if self.nodes.contains_key(&name) {
            self.problems.push(format!("duplicate node '{name}'"));
        } else {
            self.nodes.insert(name, node);
        }
        self
    }

    pub fn set_entry_point(&mut self, name: impl Into<String>) -> &mut Self {
        self.entry_point = Some(name.into());
        self
    }

    /// Connect `from` to `to` unconditionally.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.insert_edge(from.into(), Edge::fixed(to))
    }

    /// Route out of `from` by the label `router` returns.
    pub fn add_conditional_edges<F, I, K, V>(
        &mut self,
        from: impl Into<String>,
        router: F,
        routes: I,
    ) -> &mut Self
    where
        F: Fn(&S) -> String + Send + Sync + 'static,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.insert_edge(from.into(), Edge::conditional(router, routes))
    }

    /// Cap the number of node executions per run. Defaults to the node count.
    pub fn with_step_limit(&mut self, limit: usize) -> &mut Self {
        self.step_limit = Some(limit);
        self
    }

    fn insert_edge(&mut self, from: String, edge: Edge<S>) -> &mut Self {
        if self.edges.contains_key(&from) {
            self.problems
                .push(format!("node '{from}' already has an outgoing edge"));
        } else {
            self.edges.insert(from, edge);
        }
        self
    }

    /// Validate the definition and freeze it for execution.
    pub fn compile(self) -> Result<CompiledGraph<S>> {
        let mut problems = self.problems;

        let entry_point = match self.entry_point {
            Some(entry) if self.nodes.contains_key(&entry) => entry,
            Some(entry) => {
                problems.push(format!("entry point '{entry}' is not a registered node"));
                entry
            }
            None => {
                problems.push("no entry point set".to_string());
                String::new()
            }
        };

        let mut sources: Vec<&String> = self.edges.keys().collect();
        sources.sort();
        for from in sources {
            if !self.nodes.contains_key(from) {
                problems.push(format!("edge leaves unknown node '{from}'"));
            }
            for to in self.edges[from].targets() {
                if to != END && !self.nodes.contains_key(to) {
                    problems.push(format!("edge from '{from}' targets unknown node '{to}'"));
                }
            }
        }

        if !problems.is_empty() {
            return Err(TollgateError::GraphConfig(problems.join("; ")));
        }

        let step_limit = self.step_limit.unwrap_or(self.nodes.len()).max(1);
        debug!(
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            entry = %entry_point,
            step_limit,
            "Compiled graph"
        );

        Ok(CompiledGraph {
            nodes: self.nodes,
            edges: self.edges,
            entry_point,
            step_limit,
        })
    }
}

impl<S: Send + 'static> Default for StateGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one run through a compiled graph.
#[derive(Debug, Clone)]
pub struct GraphRun<S> {
    /// The state after the last node.
    pub state: S,
    /// Node names in execution order.
    pub path: Vec<String>,
    /// Total execution time in milliseconds.
    pub elapsed_ms: u64,
}

/// Immutable, validated workflow. Safe to share and invoke concurrently;
/// every run owns its own state.
pub struct CompiledGraph<S> {
    nodes: HashMap<String, Node<S>>,
    edges: HashMap<String, Edge<S>>,
    entry_point: String,
    step_limit: usize,
}

impl<S: Send + 'static> CompiledGraph<S> {
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn step_limit(&self) -> usize {
        self.step_limit
    }

    /// Registered node names, sorted.
    pub fn node_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run from the entry point until `END` (or a node with no outgoing edge).
    pub async fn invoke(&self, state: S) -> Result<S> {
        Ok(self.invoke_traced(state).await?.state)
    }

    /// Like [`CompiledGraph::invoke`], also reporting the path taken.
    pub async fn invoke_traced(&self, initial: S) -> Result<GraphRun<S>> {
        let start = Instant::now();
        let mut state = initial;
        let mut path: Vec<String> = Vec::new();
        let mut current = self.entry_point.clone();

        loop {
            if path.len() >= self.step_limit {
                warn!(
                    node = %current,
                    step_limit = self.step_limit,
                    "Step limit reached, aborting graph run"
                );
                return Err(TollgateError::StepLimitExceeded(self.step_limit));
            }

            let node = self.nodes.get(&current).ok_or_else(|| {
                TollgateError::GraphConfig(format!("node '{current}' not found in graph"))
            })?;

            debug!(node = %current, step = path.len() + 1, "Executing graph node");
            state = node.apply(state).await;
            path.push(current.clone());

            // Routing sees the state the node just produced.
            let next = match self.edges.get(&current) {
                Some(edge) => edge.resolve(&current, &state)?,
                None => {
                    debug!(node = %current, "No outgoing edge, graph complete");
                    END.to_string()
                }
            };

            if next == END {
                break;
            }
            debug!(from = %current, to = %next, "Following edge");
            current = next;
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(steps = path.len(), elapsed_ms, "Graph run complete");
        Ok(GraphRun {
            state,
            path,
            elapsed_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(name: &'static str) -> Node<Vec<String>> {
        Node::sync(name, move |mut trail: Vec<String>| {
            trail.push(name.to_string());
            trail
        })
    }

    fn last_is(expected: &'static str) -> impl Fn(&Vec<String>) -> String + Send + Sync {
        move |trail: &Vec<String>| {
            if trail.last().map(String::as_str) == Some(expected) {
                "yes".to_string()
            } else {
                "no".to_string()
            }
        }
    }

    #[tokio::test]
    async fn follows_fixed_edges_to_end() {
        let mut graph = StateGraph::new();
        graph
            .add_node(push("a"))
            .add_node(push("b"))
            .set_entry_point("a")
            .add_edge("a", "b")
            .add_edge("b", END);
        let compiled = graph.compile().unwrap();

        let run = compiled.invoke_traced(Vec::new()).await.unwrap();
        assert_eq!(run.state, vec!["a", "b"]);
        assert_eq!(run.path, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn node_without_edge_is_terminal() {
        let mut graph = StateGraph::new();
        graph.add_node(push("only")).set_entry_point("only");
        let out = graph.compile().unwrap().invoke(Vec::new()).await.unwrap();
        assert_eq!(out, vec!["only"]);
    }

    #[tokio::test]
    async fn conditional_routes_on_post_node_state() {
        let mut graph = StateGraph::new();
        graph
            .add_node(push("check"))
            .add_node(push("accept"))
            .add_node(push("refuse"))
            .set_entry_point("check")
            .add_conditional_edges(
                "check",
                last_is("check"),
                [("yes", "accept"), ("no", "refuse")],
            );
        let out = graph.compile().unwrap().invoke(Vec::new()).await.unwrap();
        assert_eq!(out, vec!["check", "accept"]);
    }

    #[tokio::test]
    async fn missing_label_aborts_with_routing_error() {
        let mut graph = StateGraph::new();
        graph
            .add_node(push("check"))
            .add_node(push("accept"))
            .set_entry_point("check")
            .add_conditional_edges("check", |_: &Vec<String>| "no".into(), [("yes", "accept")]);
        let err = graph.compile().unwrap().invoke(Vec::new()).await.unwrap_err();
        assert!(matches!(err, TollgateError::Routing { ref label, .. } if label == "no"));
    }

    #[tokio::test]
    async fn cycle_hits_step_limit() {
        let mut graph = StateGraph::new();
        graph
            .add_node(push("ping"))
            .add_node(push("pong"))
            .set_entry_point("ping")
            .add_edge("ping", "pong")
            .add_edge("pong", "ping");
        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.step_limit(), 2);

        let err = compiled.invoke(Vec::new()).await.unwrap_err();
        assert!(matches!(err, TollgateError::StepLimitExceeded(2)));
    }

    #[tokio::test]
    async fn explicit_step_limit_allows_bounded_loops() {
        let mut graph = StateGraph::new();
        graph
            .add_node(Node::sync("count", |n: u32| n + 1))
            .set_entry_point("count")
            .add_conditional_edges(
                "count",
                |n: &u32| if *n < 3 { "again" } else { "done" }.to_string(),
                [("again", "count"), ("done", END)],
            )
            .with_step_limit(5);
        assert_eq!(graph.compile().unwrap().invoke(0).await.unwrap(), 3);
    }

    #[test]
    fn compile_rejects_missing_entry_point() {
        let mut graph = StateGraph::new();
        graph.add_node(push("a"));
        let err = graph.compile().err().unwrap();
        assert!(err.to_string().contains("no entry point"));
    }

    #[test]
    fn compile_rejects_duplicate_nodes_and_edges() {
        let mut graph = StateGraph::new();
        graph
            .add_node(push("a"))
            .add_node(push("a"))
            .set_entry_point("a")
            .add_edge("a", END)
            .add_conditional_edges("a", |_: &Vec<String>| "x".into(), [("x", END)]);
        let message = graph.compile().err().unwrap().to_string();
        assert!(message.contains("duplicate node 'a'"));
        assert!(message.contains("already has an outgoing edge"));
    }

    #[test]
    fn compile_rejects_unknown_targets() {
        let mut graph = StateGraph::new();
        graph
            .add_node(push("a"))
            .set_entry_point("a")
            .add_conditional_edges("a", |_: &Vec<String>| "x".into(), [("x", "ghost")])
            .add_edge("phantom", END);
        let message = graph.compile().err().unwrap().to_string();
        assert!(message.contains("targets unknown node 'ghost'"));
        assert!(message.contains("edge leaves unknown node 'phantom'"));
    }

    #[test]
    fn end_cannot_be_a_node() {
        let mut graph = StateGraph::new();
        graph.add_node(push(END)).add_node(push("a")).set_entry_point("a");
        assert!(graph.compile().is_err());
    }
}

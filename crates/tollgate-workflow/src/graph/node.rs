use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

type NodeFn<S> = Arc<dyn Fn(S) -> BoxFuture<'static, S> + Send + Sync>;

/// A named state-transforming step.
///
/// Node functions are total: they take the state by value and always hand
/// a state back. Failures a node can anticipate must be folded into the
/// state rather than escaping.
pub struct Node<S> {
    name: String,
    func: NodeFn<S>,
}

impl<S: Send + 'static> Node<S> {
    /// Create a node from an async function.
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = S> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |state| Box::pin(func(state))),
        }
    }

    /// Create a node from a synchronous function.
    pub fn sync<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(S) -> S + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |state| {
                let next = func(state);
                Box::pin(futures::future::ready(next))
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the node against a state.
    pub async fn apply(&self, state: S) -> S {
        (self.func)(state).await
    }
}

impl<S> Clone for Node<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            func: Arc::clone(&self.func),
        }
    }
}

impl<S> std::fmt::Debug for Node<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("name", &self.name).finish()
    }
}

//! Graph execution engine: a named-node, labeled-edge state machine.
//!
//! A workflow is a set of `Node`s, each a function from state to state,
//! connected by `Edge`s. An edge is either fixed (always go to one node) or
//! conditional (a router inspects the state and returns a label, which a
//! table maps to the next node). The reserved `END` target stops the run.
//!
//! `StateGraph` collects the definition and validates it in `compile()`;
//! `CompiledGraph::invoke` walks it from the entry point, running one node
//! at a time and routing on the state that node just produced.

pub mod edge;
pub mod executor;
pub mod node;

pub use edge::{Edge, Router, END};
pub use executor::{CompiledGraph, GraphRun, StateGraph};
pub use node::Node;

//! Grafo de ejecución (DAG) derivado del registro y de un request.

mod builder;
mod node;

pub use builder::GraphBuilder;
pub use node::{ArtifactSource, ExecutionNode, NodeInput};

use std::collections::{BTreeSet, VecDeque};

use indexmap::IndexMap;
use serde_json::json;

use crate::hashing::hash_value;

/// Grafo inmutable: nodos en orden topológico + mapa de outputs pedidos.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    nodes: Vec<ExecutionNode>,
    targets: IndexMap<String, ArtifactSource>,
}

impl ExecutionGraph {
    pub(crate) fn new(nodes: Vec<ExecutionNode>, targets: IndexMap<String, ArtifactSource>) -> Self {
        Self { nodes, targets }
    }

    pub fn nodes(&self) -> &[ExecutionNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&ExecutionNode> {
        self.nodes.get(index)
    }

    pub fn find(&self, stage_id: &str) -> Option<&ExecutionNode> {
        self.nodes.iter().find(|n| n.stage_id == stage_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Outputs pedidos (en orden del request) y su origen.
    pub fn targets(&self) -> &IndexMap<String, ArtifactSource> {
        &self.targets
    }

    /// Todos los nodos alcanzables desde `index` siguiendo `dependents`
    /// (excluye a `index`).
    pub fn descendants(&self, index: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<usize> = self.nodes
                                             .get(index)
                                             .map(|n| n.dependents.iter().copied().collect())
                                             .unwrap_or_default();
        while let Some(i) = queue.pop_front() {
            if seen.insert(i) {
                if let Some(n) = self.nodes.get(i) {
                    queue.extend(n.dependents.iter().copied());
                }
            }
        }
        seen
    }

    /// Hash del grafo completo: fingerprints de nodos en orden + targets.
    /// Identifica la "corrida" lógica (mismos inputs/params => mismo hash).
    pub fn graph_hash(&self) -> String {
        let nodes: Vec<&str> = self.nodes.iter().map(|n| n.fingerprint.as_str()).collect();
        let targets: Vec<serde_json::Value> = self.targets
                                                  .iter()
                                                  .map(|(name, src)| json!({"name": name, "source": src}))
                                                  .collect();
        hash_value(&json!({ "nodes": nodes, "targets": targets }))
    }
}

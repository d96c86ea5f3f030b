use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::stage::{Parallelism, StageDefinition};

/// Origen de un artifact dentro del grafo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ArtifactSource {
    /// Provisto por el llamador en `RawInputs`.
    Raw { name: String },
    /// Output `output` (índice en `ExecutionNode::outputs`) del nodo `node`.
    Node { node: usize, output: usize },
}

/// Input resuelto de un nodo, en el orden de slots del stage.
#[derive(Debug, Clone)]
pub struct NodeInput {
    pub slot: String,
    pub source: ArtifactSource,
    pub fingerprint: String,
}

/// Nodo del grafo: un stage con parámetros resueltos y sus dependencias.
/// Se crea a partir del registro + request; es inmutable tras `build`.
#[derive(Debug, Clone)]
pub struct ExecutionNode {
    pub index: usize,
    pub stage: Arc<dyn StageDefinition>,
    pub stage_id: String,
    pub stage_version: u32,
    pub params: Value,
    pub parallelism: Parallelism,
    pub inputs: Vec<NodeInput>,
    pub outputs: Vec<String>,
    pub output_fingerprints: Vec<String>,
    pub fingerprint: String,
    /// Nodos productores de los inputs (orden ascendente, sin duplicados).
    pub dependencies: Vec<usize>,
    /// Nodos que consumen algún output de éste.
    pub dependents: Vec<usize>,
}

impl ExecutionNode {
    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|o| o == name)
    }

    pub fn is_root(&self) -> bool {
        self.dependencies.is_empty()
    }
}

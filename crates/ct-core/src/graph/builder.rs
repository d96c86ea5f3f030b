//! Construcción del grafo de ejecución.
//!
//! Se parte de los outputs pedidos y se recorre hacia atrás (DFS) buscando el
//! productor de cada artifact. Los inputs crudos tienen precedencia sobre
//! cualquier stage que produzca el mismo nombre. Los nodos se agregan en
//! post-orden, por lo que el índice de un nodo siempre es mayor que el de
//! sus dependencias (orden topológico determinista).

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use log::debug;

use super::node::{ArtifactSource, ExecutionNode, NodeInput};
use super::ExecutionGraph;
use crate::errors::PipelineError;
use crate::model::{output_fingerprint, NodeFingerprintInput, RawInputs};
use crate::params::resolve_params;
use crate::pipeline::PipelineRequest;
use crate::stage::StageRegistry;

pub struct GraphBuilder<'r> {
    registry: &'r StageRegistry,
}

#[derive(Default)]
struct BuildState {
    nodes: Vec<ExecutionNode>,
    by_stage: HashMap<String, usize>,
    // pila de stages en visita (para reportar el ciclo completo)
    visiting: Vec<String>,
}

impl<'r> GraphBuilder<'r> {
    pub fn new(registry: &'r StageRegistry) -> Self {
        Self { registry }
    }

    pub fn build(&self, request: &PipelineRequest, raw: &RawInputs) -> Result<ExecutionGraph, PipelineError> {
        request.validate()?;
        self.check_overrides(request)?;

        let mut state = BuildState::default();
        let mut targets = IndexMap::new();
        for output in request.requested_outputs() {
            let (source, _) = self.resolve_artifact(output, None, request, raw, &mut state)?;
            targets.insert(output.to_string(), source);
        }

        let mut nodes = state.nodes;
        for i in 0..nodes.len() {
            for dep in nodes[i].dependencies.clone() {
                nodes[dep].dependents.push(i);
            }
        }
        debug!("graph built: {} node(s), {} target(s)", nodes.len(), targets.len());
        Ok(ExecutionGraph::new(nodes, targets))
    }

    /// Overrides deben nombrar stages registrados y ser válidos aun cuando
    /// el stage no termine formando parte del grafo.
    fn check_overrides(&self, request: &PipelineRequest) -> Result<(), PipelineError> {
        for (stage_id, overrides) in &request.overrides {
            let stage = self.registry
                            .lookup(stage_id)
                            .map_err(|_| PipelineError::InvalidRequest(format!("overrides for unknown stage '{stage_id}'")))?;
            resolve_params(stage.as_ref(), Some(overrides)).map_err(PipelineError::InvalidRequest)?;
        }
        Ok(())
    }

    fn resolve_artifact(&self,
                        artifact: &str,
                        required_by: Option<&str>,
                        request: &PipelineRequest,
                        raw: &RawInputs,
                        state: &mut BuildState)
                        -> Result<(ArtifactSource, String), PipelineError> {
        if let Some(input) = raw.get(artifact) {
            return Ok((ArtifactSource::Raw { name: artifact.to_string() }, input.fingerprint.clone()));
        }
        let stage_id = self.registry
                           .producer_of(artifact)
                           .ok_or_else(|| PipelineError::UnresolvedArtifact { artifact: artifact.to_string(),
                                                                               required_by: required_by.map(str::to_string) })?;
        let node = self.resolve_stage(stage_id, request, raw, state)?;
        let output = state.nodes[node]
            .output_index(artifact)
            .ok_or_else(|| PipelineError::Internal(format!("stage '{stage_id}' does not declare output '{artifact}'")))?;
        Ok((ArtifactSource::Node { node, output }, state.nodes[node].output_fingerprints[output].clone()))
    }

    fn resolve_stage(&self,
                     stage_id: &str,
                     request: &PipelineRequest,
                     raw: &RawInputs,
                     state: &mut BuildState)
                     -> Result<usize, PipelineError> {
        if let Some(&index) = state.by_stage.get(stage_id) {
            return Ok(index);
        }
        if let Some(pos) = state.visiting.iter().position(|s| s == stage_id) {
            let mut cycle = state.visiting[pos..].to_vec();
            cycle.push(stage_id.to_string());
            return Err(PipelineError::CyclicDependency { cycle });
        }

        let stage = self.registry.lookup(stage_id)?.clone();
        let params = resolve_params(stage.as_ref(), request.overrides.get(stage_id)).map_err(PipelineError::InvalidRequest)?;

        state.visiting.push(stage_id.to_string());
        let mut inputs = Vec::new();
        let mut dependencies = BTreeSet::new();
        for slot in stage.inputs() {
            let (source, fingerprint) = self.resolve_artifact(&slot, Some(stage_id), request, raw, state)?;
            if let ArtifactSource::Node { node, .. } = source {
                dependencies.insert(node);
            }
            inputs.push(NodeInput { slot, source, fingerprint });
        }
        state.visiting.pop();

        let input_fps: Vec<String> = inputs.iter().map(|i| i.fingerprint.clone()).collect();
        let fingerprint = NodeFingerprintInput::new(stage.id(), stage.version(), &params, &input_fps).fingerprint();
        let outputs = stage.outputs();
        let output_fingerprints = outputs.iter().map(|o| output_fingerprint(&fingerprint, o)).collect();

        let index = state.nodes.len();
        state.nodes.push(ExecutionNode { index,
                                         stage_id: stage_id.to_string(),
                                         stage_version: stage.version(),
                                         parallelism: stage.parallelism(),
                                         stage,
                                         params,
                                         inputs,
                                         outputs,
                                         output_fingerprints,
                                         fingerprint,
                                         dependencies: dependencies.into_iter().collect(),
                                         dependents: Vec::new() });
        state.by_stage.insert(stage_id.to_string(), index);
        Ok(index)
    }
}

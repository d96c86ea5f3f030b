//! Scheduler: ejecuta un `ExecutionGraph` sobre un pool acotado de workers.
//!
//! El coordinador corre en el hilo llamador y es el único dueño de los
//! estados de nodo. Los nodos listos se despachan (en orden de índice
//! topológico) como trabajos independientes del pool; cada trabajo informa
//! su resultado por un canal. La cancelación se consulta entre despachos.
//!
//! Cada corrida usa su propio pool: un worker que espera un cómputo en
//! curso de la cache nunca puede estar esperándose a sí mismo (los
//! fingerprints de un grafo son únicos y el work-stealing de rayon queda
//! confinado a la corrida).

mod cancel;
mod job;

pub use cancel::CancellationToken;

use std::collections::BTreeSet;
use std::sync::{mpsc, Arc};
use std::time::Instant;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::cache::{ArtifactCache, CacheLookup, CacheSource};
use crate::constants::DEFAULT_SLICE_CHUNK;
use crate::errors::{PipelineError, StageError, StageExecutionError};
use crate::event::RunEventKind;
use crate::graph::{ArtifactSource, ExecutionGraph};
use crate::model::{ArtifactBundle, ArtifactRef, RawInputs};
use crate::stage::NodeState;
use job::NodeJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tamaño del pool de workers.
    pub workers: usize,
    /// Slices por sub-rango en stages per-slice.
    pub slice_chunk: usize,
    /// Fail-fast por defecto para requests que no lo pidan.
    pub fail_fast_default: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
               slice_chunk: DEFAULT_SLICE_CHUNK,
               fail_fast_default: false }
    }
}

/// Estado final de un nodo tras la corrida.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub state: NodeState,
    pub bundle: Option<Arc<ArtifactBundle>>,
    pub cache_source: Option<CacheSource>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error: Option<StageExecutionError>,
    /// Nodo cuyo fallo impidió ejecutar éste.
    pub failed_upstream: Option<usize>,
}

impl NodeRecord {
    fn pending() -> Self {
        Self { state: NodeState::Pending,
               bundle: None,
               cache_source: None,
               started_at: None,
               finished_at: None,
               duration_ms: None,
               error: None,
               failed_upstream: None }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    /// Alineado con `graph.nodes()`.
    pub records: Vec<NodeRecord>,
    /// Fallos originados por stages (no los propagados), en orden de
    /// detección.
    pub failures: Vec<StageExecutionError>,
    /// `true` si fail-fast detuvo la planificación.
    pub aborted: bool,
    /// `true` si la cancelación dejó nodos sin ejecutar.
    pub cancelled: bool,
}

impl ScheduleOutcome {
    pub fn first_failure(&self) -> Option<&StageExecutionError> {
        self.failures.first()
    }

    pub fn count(&self, state: NodeState) -> usize {
        self.records.iter().filter(|r| r.state == state).count()
    }

    /// Artifact referenciado por `source`, si está disponible.
    pub fn resolve(&self, graph: &ExecutionGraph, raw: &RawInputs, source: &ArtifactSource) -> Option<ArtifactRef> {
        match source {
            ArtifactSource::Raw { name } => raw.get(name).cloned(),
            ArtifactSource::Node { node, output } => {
                let name = graph.node(*node)?.outputs.get(*output)?;
                self.records.get(*node)?.bundle.as_ref()?.get(name).cloned()
            }
        }
    }
}

struct Completion {
    index: usize,
    result: Result<CacheLookup, StageExecutionError>,
    elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    fn build_pool(&self) -> Result<ThreadPool, PipelineError> {
        ThreadPoolBuilder::new().num_threads(self.config.workers.max(1))
                                .thread_name(|i| format!("ctflow-worker-{i}"))
                                .build()
                                .map_err(|e| PipelineError::Internal(format!("worker pool: {e}")))
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Ejecuta `graph` hasta que no quede nada despachable. Los eventos se
    /// entregan a `emit` en el orden en que el coordinador los observa.
    pub fn execute(&self,
                   graph: &ExecutionGraph,
                   raw: &RawInputs,
                   cache: &Arc<ArtifactCache>,
                   fail_fast: bool,
                   cancel: &CancellationToken,
                   emit: &mut dyn FnMut(RunEventKind))
                   -> Result<ScheduleOutcome, PipelineError> {
        let pool = self.build_pool()?;
        let mut run = RunState::new(graph, emit);
        let (tx, rx) = mpsc::channel::<Completion>();
        let mut running = 0usize;

        for index in 0..graph.len() {
            if graph.nodes()[index].dependencies.is_empty() {
                run.mark_ready(index);
            }
        }

        loop {
            while !run.aborted && !cancel.is_cancelled() {
                let Some(index) = run.ready.pop_first() else { break };
                match self.prepare(graph, raw, cache, &run.records, index) {
                    Ok(job) => {
                        run.mark_running(index);
                        let tx = tx.clone();
                        pool.spawn(move || {
                                let started = Instant::now();
                                let result = job.run();
                                let elapsed_ms = started.elapsed().as_millis() as u64;
                                let _ = tx.send(Completion { index, result, elapsed_ms });
                            });
                        running += 1;
                    }
                    Err(err) => {
                        run.mark_running(index);
                        run.fail(index, err, fail_fast);
                    }
                }
            }
            if running == 0 {
                break;
            }
            let Ok(done) = rx.recv() else { break };
            running -= 1;
            match done.result {
                Ok(lookup) => run.finish(done.index, lookup, done.elapsed_ms),
                Err(err) => {
                    run.records[done.index].duration_ms = Some(done.elapsed_ms);
                    run.fail(done.index, err, fail_fast)
                }
            }
        }

        run.cancel_leftovers();
        let cancelled = cancel.is_cancelled() && run.records.iter().any(|r| r.state == NodeState::Cancelled);
        if cancelled {
            warn!("run cancelled: {} node(s) not executed",
                  run.records.iter().filter(|r| r.state == NodeState::Cancelled).count());
        }
        Ok(ScheduleOutcome { records: run.records,
                             failures: run.failures,
                             aborted: run.aborted,
                             cancelled })
    }

    /// Arma el trabajo de `index` con referencias a sus inputs ya
    /// disponibles.
    fn prepare(&self,
               graph: &ExecutionGraph,
               raw: &RawInputs,
               cache: &Arc<ArtifactCache>,
               records: &[NodeRecord],
               index: usize)
               -> Result<NodeJob, StageExecutionError> {
        let node = &graph.nodes()[index];
        let mut inputs = IndexMap::with_capacity(node.inputs.len());
        for input in &node.inputs {
            let artifact = match &input.source {
                ArtifactSource::Raw { name } => raw.get(name).cloned(),
                ArtifactSource::Node { node: producer, output } => records[*producer]
                    .bundle
                    .as_ref()
                    .and_then(|b| b.artifacts.get(*output).cloned()),
            };
            let artifact = artifact.ok_or_else(|| {
                                       StageExecutionError::new(node.stage_id.clone(),
                                                                node.params.clone(),
                                                                node.fingerprint.clone(),
                                                                StageError::MissingInput(input.slot.clone()))
                                   })?;
            inputs.insert(input.slot.clone(), artifact);
        }
        Ok(NodeJob { stage: node.stage.clone(),
                     stage_id: node.stage_id.clone(),
                     params: node.params.clone(),
                     fingerprint: node.fingerprint.clone(),
                     outputs: node.outputs.clone(),
                     output_fingerprints: node.output_fingerprints.clone(),
                     parallelism: node.parallelism,
                     inputs,
                     slice_chunk: self.config.slice_chunk,
                     cache: Arc::clone(cache) })
    }
}

/// Estado mutable de una corrida; sólo lo toca el coordinador.
struct RunState<'g, 'e> {
    graph: &'g ExecutionGraph,
    emit: &'e mut dyn FnMut(RunEventKind),
    records: Vec<NodeRecord>,
    remaining: Vec<usize>,
    ready: BTreeSet<usize>,
    failures: Vec<StageExecutionError>,
    aborted: bool,
}

impl<'g, 'e> RunState<'g, 'e> {
    fn new(graph: &'g ExecutionGraph, emit: &'e mut dyn FnMut(RunEventKind)) -> Self {
        Self { graph,
               emit,
               records: (0..graph.len()).map(|_| NodeRecord::pending()).collect(),
               remaining: graph.nodes().iter().map(|n| n.dependencies.len()).collect(),
               ready: BTreeSet::new(),
               failures: Vec::new(),
               aborted: false }
    }

    fn transition(&mut self, index: usize, next: NodeState) {
        let current = self.records[index].state;
        debug_assert!(current.can_transition_to(next), "node {index}: {current:?} -> {next:?}");
        self.records[index].state = next;
    }

    fn stage_id(&self, index: usize) -> String {
        self.graph.nodes()[index].stage_id.clone()
    }

    fn mark_ready(&mut self, index: usize) {
        self.transition(index, NodeState::Ready);
        self.ready.insert(index);
        let stage_id = self.stage_id(index);
        (self.emit)(RunEventKind::NodeReady { node: index, stage_id });
    }

    fn mark_running(&mut self, index: usize) {
        self.transition(index, NodeState::Running);
        self.records[index].started_at = Some(Utc::now());
        let graph = self.graph;
        let node = &graph.nodes()[index];
        debug!("dispatching node {} '{}'", index, node.stage_id);
        (self.emit)(RunEventKind::NodeStarted { node: index,
                                                stage_id: node.stage_id.clone(),
                                                fingerprint: node.fingerprint.clone() });
    }

    fn finish(&mut self, index: usize, lookup: CacheLookup, elapsed_ms: u64) {
        self.transition(index, NodeState::Done);
        let graph = self.graph;
        let node = &graph.nodes()[index];
        info!("stage '{}' done in {} ms ({:?})", node.stage_id, elapsed_ms, lookup.source);
        let record = &mut self.records[index];
        record.finished_at = Some(Utc::now());
        record.duration_ms = Some(elapsed_ms);
        record.cache_source = Some(lookup.source);
        record.bundle = Some(lookup.bundle);
        (self.emit)(RunEventKind::NodeFinished { node: index,
                                                 stage_id: node.stage_id.clone(),
                                                 fingerprint: node.fingerprint.clone(),
                                                 outputs: node.output_fingerprints.clone(),
                                                 cache_source: lookup.source });
        for &dependent in &node.dependents {
            self.remaining[dependent] -= 1;
            if self.remaining[dependent] == 0 && self.records[dependent].state == NodeState::Pending {
                self.mark_ready(dependent);
            }
        }
    }

    /// Marca `index` como fallido y propaga `Failed` a sus descendientes
    /// no ejecutados.
    fn fail(&mut self, index: usize, err: StageExecutionError, fail_fast: bool) {
        self.transition(index, NodeState::Failed);
        error!("{err}");
        let now = Utc::now();
        self.records[index].finished_at = Some(now);
        self.records[index].error = Some(err.clone());
        (self.emit)(RunEventKind::NodeFailed { node: index,
                                               stage_id: err.stage_id.clone(),
                                               fingerprint: err.fingerprint.clone(),
                                               error: err.clone(),
                                               upstream: None });
        let graph = self.graph;
        for descendant in graph.descendants(index) {
            if !matches!(self.records[descendant].state, NodeState::Pending | NodeState::Ready) {
                continue;
            }
            self.ready.remove(&descendant);
            self.transition(descendant, NodeState::Failed);
            let node = &graph.nodes()[descendant];
            let record = &mut self.records[descendant];
            record.finished_at = Some(now);
            record.error = Some(err.clone());
            record.failed_upstream = Some(index);
            (self.emit)(RunEventKind::NodeFailed { node: descendant,
                                                   stage_id: node.stage_id.clone(),
                                                   fingerprint: node.fingerprint.clone(),
                                                   error: err.clone(),
                                                   upstream: Some(index) });
        }
        self.failures.push(err);
        if fail_fast {
            self.aborted = true;
        }
    }

    fn cancel_leftovers(&mut self) {
        for index in 0..self.records.len() {
            if matches!(self.records[index].state, NodeState::Pending | NodeState::Ready) {
                self.transition(index, NodeState::Cancelled);
                let stage_id = self.stage_id(index);
                (self.emit)(RunEventKind::NodeCancelled { node: index, stage_id });
            }
        }
        self.ready.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::model::{ArrayData, ArtifactPayload};
    use crate::pipeline::PipelineRequest;
    use crate::stage::{FnStage, StageRegistry};

    fn scheduler(workers: usize) -> Scheduler {
        Scheduler::new(SchedulerConfig { workers,
                                         slice_chunk: 2,
                                         fail_fast_default: false })
    }

    fn copy(id: &str, input: &str, output: &str) -> FnStage {
        FnStage::new(id, &[input], &[output], |ctx| Ok(vec![ArtifactPayload::Array(ctx.primary_array()?.clone())]))
    }

    #[test]
    fn per_slice_results_are_concatenated_in_order() {
        let mut reg = StageRegistry::new();
        reg.register(FnStage::new("scale", &["projections"], &["scaled"], |ctx| {
                         let arr = ctx.primary_array()?;
                         let offset = ctx.slice_range.clone().map(|r| r.start).unwrap_or(0) as f32;
                         // cada frame queda con el índice global del frame
                         let frame_len = arr.frame_len();
                         let data = (0..arr.len()).map(|i| offset + (i / frame_len) as f32).collect();
                         Ok(vec![ArtifactPayload::Array(ArrayData::new(arr.shape.clone(), data)?)])
                     }).per_slice())
           .unwrap();
        let raw = RawInputs::new().with("projections", ArrayData::zeros(vec![5, 1, 2]));
        let graph = GraphBuilder::new(&reg).build(&PipelineRequest::new(["scaled"]), &raw).unwrap();
        let cache = Arc::new(ArtifactCache::default());
        let out = scheduler(3).execute(&graph, &raw, &cache, false, &CancellationToken::new(), &mut |_| {}).unwrap();
        let art = out.resolve(&graph, &raw, &graph.targets()["scaled"]).unwrap();
        assert_eq!(art.array().unwrap().data, vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 4.0, 4.0]);
    }

    #[test]
    fn panicking_stage_becomes_failure() {
        let mut reg = StageRegistry::new();
        reg.register(FnStage::new("boom", &["projections"], &["out"], |_| panic!("kernel exploded")))
           .unwrap();
        let raw = RawInputs::new().with("projections", ArrayData::zeros(vec![1, 1, 1]));
        let graph = GraphBuilder::new(&reg).build(&PipelineRequest::new(["out"]), &raw).unwrap();
        let cache = Arc::new(ArtifactCache::default());
        let out = scheduler(1).execute(&graph, &raw, &cache, false, &CancellationToken::new(), &mut |_| {}).unwrap();
        let err = out.first_failure().unwrap();
        assert_eq!(err.error, StageError::Panicked("kernel exploded".into()));
        assert!(cache.is_empty());
    }

    #[test]
    fn wrong_output_count_fails_the_node() {
        let mut reg = StageRegistry::new();
        reg.register(FnStage::new("two", &["projections"], &["a", "b"], |_| Ok(vec![ArtifactPayload::Scalar(1.0)])))
           .unwrap();
        let raw = RawInputs::new().with("projections", 1.0);
        let graph = GraphBuilder::new(&reg).build(&PipelineRequest::new(["a"]), &raw).unwrap();
        let cache = Arc::new(ArtifactCache::default());
        let out = scheduler(1).execute(&graph, &raw, &cache, false, &CancellationToken::new(), &mut |_| {}).unwrap();
        assert!(matches!(out.first_failure().unwrap().error, StageError::OutputArity { expected: 2, found: 1 }));
    }

    #[test]
    fn pre_cancelled_run_executes_nothing() {
        let mut reg = StageRegistry::new();
        reg.register(copy("a", "projections", "x")).unwrap();
        reg.register(copy("b", "x", "y")).unwrap();
        let raw = RawInputs::new().with("projections", ArrayData::zeros(vec![1, 1, 1]));
        let graph = GraphBuilder::new(&reg).build(&PipelineRequest::new(["y"]), &raw).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let cache = Arc::new(ArtifactCache::default());
        let out = scheduler(2).execute(&graph, &raw, &cache, false, &token, &mut |_| {}).unwrap();
        assert!(out.cancelled);
        assert_eq!(out.count(NodeState::Cancelled), 2);
        assert!(cache.is_empty());
    }
}

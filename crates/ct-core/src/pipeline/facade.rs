//! Punto de entrada: request -> grafo -> scheduler -> artifacts + diagnósticos.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use log::info;
use serde_json::json;
use uuid::Uuid;

use super::report::{NodeDiagnostic, PipelineOutput, RunStatus};
use super::request::PipelineRequest;
use crate::cache::{ArtifactCache, PinGuard};
use crate::constants::ENGINE_VERSION;
use crate::errors::PipelineError;
use crate::event::{EventStore, InMemoryEventStore, RunEvent, RunEventKind};
use crate::graph::{ExecutionGraph, GraphBuilder};
use crate::hashing::hash_value;
use crate::model::RawInputs;
use crate::progress::RunProgress;
use crate::scheduler::{CancellationToken, ScheduleOutcome, Scheduler, SchedulerConfig};
use crate::stage::{NodeState, StageRegistry};

/// Fachada del pipeline. Comparte la cache entre corridas; cada corrida
/// tiene su propio grafo y estado de nodos.
pub struct Pipeline<'r, E = InMemoryEventStore>
    where E: EventStore
{
    registry: &'r StageRegistry,
    cache: Arc<ArtifactCache>,
    scheduler: Scheduler,
    events: Mutex<E>,
    last_run: Mutex<Option<Uuid>>,
}

impl<'r> Pipeline<'r, InMemoryEventStore> {
    pub fn new(registry: &'r StageRegistry, cache: Arc<ArtifactCache>, config: SchedulerConfig) -> Self {
        Self::with_event_store(registry, cache, config, InMemoryEventStore::new())
    }
}

impl<'r, E> Pipeline<'r, E> where E: EventStore
{
    pub fn with_event_store(registry: &'r StageRegistry, cache: Arc<ArtifactCache>, config: SchedulerConfig, events: E) -> Self {
        Self { registry,
               cache,
               scheduler: Scheduler::new(config),
               events: Mutex::new(events),
               last_run: Mutex::new(None) }
    }

    pub fn registry(&self) -> &StageRegistry {
        self.registry
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        self.scheduler.config()
    }

    fn store(&self) -> MutexGuard<'_, E> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, run_id: Uuid, kind: RunEventKind) {
        self.store().append_kind(run_id, kind);
    }

    /// Construye (sin ejecutar) el grafo que correría `request`.
    pub fn plan(&self, request: &PipelineRequest, raw: &RawInputs) -> Result<ExecutionGraph, PipelineError> {
        GraphBuilder::new(self.registry).build(request, raw)
    }

    pub fn run(&self, request: &PipelineRequest, raw: &RawInputs) -> Result<PipelineOutput, PipelineError> {
        self.run_with_cancel(request, raw, &CancellationToken::new())
    }

    /// Ejecuta `request`. Errores de construcción del grafo se devuelven
    /// antes de ejecutar nada; con fail-fast el primer fallo de un stage se
    /// devuelve como `PipelineExecution`. Sin fail-fast los fallos quedan en
    /// `PipelineOutput::failures` con estado `PartiallyFailed`.
    pub fn run_with_cancel(&self,
                           request: &PipelineRequest,
                           raw: &RawInputs,
                           cancel: &CancellationToken)
                           -> Result<PipelineOutput, PipelineError> {
        let graph = self.plan(request, raw)?;
        let run_id = Uuid::new_v4();
        *self.last_run.lock().unwrap_or_else(PoisonError::into_inner) = Some(run_id);
        let fail_fast = request.fail_fast || self.scheduler.config().fail_fast_default;
        let graph_hash = graph.graph_hash();

        // entradas fijadas mientras dure la corrida
        let pins: Vec<PinGuard> = graph.nodes().iter().map(|n| self.cache.pin(&n.fingerprint)).collect();

        self.append(run_id,
                    RunEventKind::RunStarted { graph_hash: graph_hash.clone(),
                                               node_count: graph.len(),
                                               targets: graph.targets().keys().cloned().collect() });
        info!("run {run_id}: {} node(s), outputs {:?}", graph.len(), graph.targets().keys().collect::<Vec<_>>());

        let outcome = self.scheduler
                          .execute(&graph, raw, &self.cache, fail_fast, cancel, &mut |kind| self.append(run_id, kind))?;

        let status = if outcome.cancelled {
            RunStatus::Cancelled
        } else if outcome.failures.is_empty() {
            RunStatus::Completed
        } else if fail_fast {
            RunStatus::Failed
        } else {
            RunStatus::PartiallyFailed
        };
        let run_fingerprint = run_fingerprint(&graph, &outcome);
        self.append(run_id,
                    RunEventKind::RunCompleted { status,
                                                 run_fingerprint: run_fingerprint.clone() });
        drop(pins);

        info!("run {run_id} finished {:?}: {} done, {} failed, {} cancelled",
              status,
              outcome.count(NodeState::Done),
              outcome.count(NodeState::Failed),
              outcome.count(NodeState::Cancelled));

        if fail_fast {
            if let Some(first) = outcome.first_failure() {
                return Err(PipelineError::PipelineExecution(Box::new(first.clone())));
            }
        }

        let mut artifacts = IndexMap::new();
        for (name, source) in graph.targets() {
            if let Some(artifact) = outcome.resolve(&graph, raw, source) {
                artifacts.insert(name.clone(), artifact);
            }
        }
        Ok(PipelineOutput { run_id,
                            status,
                            artifacts,
                            diagnostics: diagnostics(&graph, &outcome),
                            failures: outcome.failures,
                            graph_hash,
                            run_fingerprint,
                            cache_stats: self.cache.stats() })
    }

    /// Id de la última corrida iniciada (también cuando terminó en error).
    pub fn last_run_id(&self) -> Option<Uuid> {
        *self.last_run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events_for(&self, run_id: Uuid) -> Vec<RunEvent> {
        self.store().list(run_id)
    }

    /// Progreso de `run_id` reconstruido desde sus eventos.
    pub fn progress(&self, run_id: Uuid) -> RunProgress {
        RunProgress::replay(&self.events_for(run_id), 0)
    }
}

/// Fingerprint agregado de la corrida: fingerprints de nodos `Done` en orden
/// topológico.
fn run_fingerprint(graph: &ExecutionGraph, outcome: &ScheduleOutcome) -> String {
    let done: Vec<&str> = graph.nodes()
                               .iter()
                               .zip(&outcome.records)
                               .filter(|(_, r)| r.state == NodeState::Done)
                               .map(|(n, _)| n.fingerprint.as_str())
                               .collect();
    hash_value(&json!({
        "engine_version": ENGINE_VERSION,
        "graph_hash": graph.graph_hash(),
        "node_fingerprints": done,
    }))
}

fn diagnostics(graph: &ExecutionGraph, outcome: &ScheduleOutcome) -> Vec<NodeDiagnostic> {
    graph.nodes()
         .iter()
         .zip(&outcome.records)
         .map(|(node, record)| NodeDiagnostic { node_index: node.index,
                                                stage_id: node.stage_id.clone(),
                                                fingerprint: node.fingerprint.clone(),
                                                params: node.params.clone(),
                                                status: record.state,
                                                cache_source: record.cache_source,
                                                started_at: record.started_at,
                                                finished_at: record.finished_at,
                                                duration_ms: record.duration_ms,
                                                error: record.error.clone(),
                                                failed_upstream: record.failed_upstream
                                                                       .and_then(|i| graph.node(i))
                                                                       .map(|n| n.stage_id.clone()) })
         .collect()
}

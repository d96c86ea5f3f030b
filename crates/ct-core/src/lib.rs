//! ct-core: motor de orquestación de pipelines de reconstrucción CT.
//!
//! Registro de stages -> grafo de dependencias -> scheduler paralelo sobre
//! una cache de artifacts direccionada por fingerprint.
pub mod cache;
pub mod constants;
pub mod errors;
pub mod event;
pub mod graph;
pub mod hashing;
pub mod model;
pub mod params;
pub mod pipeline;
pub mod progress;
pub mod scheduler;
pub mod stage;

pub use cache::{ArtifactCache, ArtifactStore, CacheConfig, CacheLookup, CacheSource, CacheStats, InMemoryArtifactStore,
                JsonDirStore, PinGuard};
pub use errors::{PipelineError, StageError, StageExecutionError};
pub use event::{EventStore, InMemoryEventStore, RunEvent, RunEventKind};
pub use graph::{ArtifactSource, ExecutionGraph, ExecutionNode, GraphBuilder};
pub use model::{ArrayData, Artifact, ArtifactBundle, ArtifactKind, ArtifactPayload, ArtifactRef, ExecutionContext, RawInputs};
pub use pipeline::{NodeDiagnostic, Pipeline, PipelineOutput, PipelineRequest, RunStatus};
pub use progress::RunProgress;
pub use scheduler::{CancellationToken, ScheduleOutcome, Scheduler, SchedulerConfig};
pub use stage::{FnStage, NodeState, Parallelism, StageDefinition, StageDescriptor, StageRegistry, StageRunResult,
                TypedStage};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn chain() -> StageRegistry {
        let mut reg = StageRegistry::new();
        reg.register(FnStage::new("normalize", &["projections"], &["normalized"], |ctx| {
                         let arr = ctx.primary_array()?;
                         Ok(vec![ArtifactPayload::Array(arr.clone())])
                     }).per_slice())
           .unwrap();
        reg.register(FnStage::new("filter", &["normalized"], &["filtered"], |ctx| {
                         let gain = ctx.params["gain"].as_f64().unwrap_or(1.0) as f32;
                         let arr = ctx.primary_array()?;
                         let data = arr.data.iter().map(|v| v * gain).collect();
                         Ok(vec![ArtifactPayload::Array(ArrayData::new(arr.shape.clone(), data)?)])
                     }).with_defaults(json!({"gain": 1.0})))
           .unwrap();
        reg.register(FnStage::new("reconstruct", &["filtered"], &["volume"], |ctx| {
                         let sum: f32 = ctx.primary_array()?.data.iter().sum();
                         Ok(vec![ArtifactPayload::Scalar(sum as f64)])
                     }))
           .unwrap();
        reg
    }

    #[test]
    fn chain_runs_and_reuses_cache() {
        let reg = chain();
        let cache = Arc::new(ArtifactCache::default());
        let pipeline = Pipeline::new(&reg, cache.clone(), SchedulerConfig::default());
        let raw = RawInputs::new().with("projections", ArrayData::filled(vec![4, 2, 2], 1.0));

        let first = pipeline.run(&PipelineRequest::new(["volume"]), &raw).unwrap();
        assert_eq!(first.status, RunStatus::Completed);
        assert_eq!(first.require("volume").unwrap().scalar(), Some(16.0));
        assert_eq!(cache.len(), 3);

        let second = pipeline.run(&PipelineRequest::new(["volume"]).with_override("filter", json!({"gain": 2.0})),
                                  &raw)
                             .unwrap();
        assert_eq!(second.require("volume").unwrap().scalar(), Some(32.0));
        assert!(second.diagnostic("normalize").unwrap().is_cache_hit());
        assert!(!second.diagnostic("filter").unwrap().is_cache_hit());
        assert!(!second.diagnostic("reconstruct").unwrap().is_cache_hit());
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn events_describe_the_run() {
        let reg = chain();
        let pipeline = Pipeline::new(&reg, Arc::new(ArtifactCache::default()), SchedulerConfig::default());
        let raw = RawInputs::new().with("projections", ArrayData::filled(vec![2, 1, 1], 1.0));
        let out = pipeline.run(&PipelineRequest::new(["volume"]), &raw).unwrap();
        let events = pipeline.events_for(out.run_id);
        assert!(matches!(events.first().map(|e| &e.kind), Some(RunEventKind::RunStarted { node_count: 3, .. })));
        assert!(matches!(events.last().map(|e| &e.kind), Some(RunEventKind::RunCompleted { status: RunStatus::Completed, .. })));
        let progress = pipeline.progress(out.run_id);
        assert_eq!(progress.count(NodeState::Done), 3);
        assert_eq!(progress.run_fingerprint.as_deref(), Some(out.run_fingerprint.as_str()));
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use ct_core::{ArrayData, ArtifactCache, ArtifactPayload, CacheConfig, CancellationToken, FnStage, NodeState, Pipeline,
              PipelineError, PipelineRequest, RawInputs, RunEventKind, RunStatus, SchedulerConfig, StageError,
              StageRegistry};
use serde_json::json;

fn config(workers: usize) -> SchedulerConfig {
    SchedulerConfig { workers,
                      slice_chunk: 2,
                      fail_fast_default: false }
}

fn pass(id: &str, input: &str, output: &str) -> FnStage {
    FnStage::new(id, &[input], &[output], |ctx| Ok(vec![ArtifactPayload::Array(ctx.primary_array()?.clone())]))
}

fn slow(id: &str, input: &str, output: &str, ms: u64) -> FnStage {
    FnStage::new(id, &[input], &[output], move |ctx| {
        thread::sleep(Duration::from_millis(ms));
        Ok(vec![ArtifactPayload::Array(ctx.primary_array()?.clone())])
    })
}

fn failing(id: &str, input: &str, output: &str) -> FnStage {
    FnStage::new(id, &[input], &[output], |_| Err(StageError::Kernel("singular geometry".into())))
        .with_defaults(json!({"angle": 180}))
}

fn raw() -> RawInputs {
    RawInputs::new().with("projections", ArrayData::filled(vec![4, 2, 2], 1.0))
}

/// projections -> a -> b(falla) -> c ; a -> d -> e
fn branching(d_delay_ms: u64) -> StageRegistry {
    let mut reg = StageRegistry::new();
    reg.register(pass("a", "projections", "x")).unwrap();
    reg.register(failing("b", "x", "y")).unwrap();
    reg.register(pass("c", "y", "z")).unwrap();
    reg.register(slow("d", "x", "w", d_delay_ms)).unwrap();
    reg.register(pass("e", "w", "v")).unwrap();
    reg
}

#[test]
fn failure_is_isolated_to_its_branch() {
    let reg = branching(0);
    let pipeline = Pipeline::new(&reg, Arc::new(ArtifactCache::default()), config(2));
    let out = pipeline.run(&PipelineRequest::new(["z", "v"]), &raw()).unwrap();

    assert_eq!(out.status, RunStatus::PartiallyFailed);
    assert!(out.artifact("v").is_some());
    assert!(out.artifact("z").is_none());
    assert!(matches!(out.require("z"), Err(PipelineError::UnresolvedArtifact { .. })));

    let state = |s: &str| out.diagnostic(s).unwrap().status;
    assert_eq!(state("a"), NodeState::Done);
    assert_eq!(state("b"), NodeState::Failed);
    assert_eq!(state("c"), NodeState::Failed);
    assert_eq!(state("d"), NodeState::Done);
    assert_eq!(state("e"), NodeState::Done);
    assert_eq!(out.diagnostic("c").unwrap().failed_upstream.as_deref(), Some("b"));

    // el reporte identifica stage, params y fingerprint del nodo que falló
    assert_eq!(out.failures.len(), 1);
    let failure = &out.failures[0];
    assert_eq!(failure.stage_id, "b");
    assert_eq!(failure.params, json!({"angle": 180}));
    assert_eq!(failure.fingerprint, out.diagnostic("b").unwrap().fingerprint);
    assert_eq!(failure.error, StageError::Kernel("singular geometry".into()));
}

#[test]
fn descendants_of_failure_never_start() {
    let reg = branching(0);
    let pipeline = Pipeline::new(&reg, Arc::new(ArtifactCache::default()), config(2));
    let out = pipeline.run(&PipelineRequest::new(["z"]), &raw()).unwrap();
    let c = out.diagnostic("c").unwrap();
    let started_c = pipeline.events_for(out.run_id)
                            .iter()
                            .any(|e| matches!(&e.kind, RunEventKind::NodeStarted { node, .. } if *node == c.node_index));
    assert!(!started_c);
    assert!(c.started_at.is_none());
}

#[test]
fn fail_fast_aborts_and_wraps_first_failure() {
    let reg = branching(150);
    let cache = Arc::new(ArtifactCache::default());
    let pipeline = Pipeline::new(&reg, cache, config(2));
    let err = pipeline.run(&PipelineRequest::new(["z", "v"]).fail_fast(true), &raw()).unwrap_err();
    let PipelineError::PipelineExecution(inner) = err else { panic!("expected PipelineExecution") };
    assert_eq!(inner.stage_id, "b");

    // "d" ya estaba corriendo y termina; "e" queda sin despachar
    let graph = pipeline.plan(&PipelineRequest::new(["z", "v"]), &raw()).unwrap();
    let e_index = graph.find("e").unwrap().index;
    let events = pipeline.events_for(pipeline.last_run_id().unwrap());
    assert!(events.iter()
                  .any(|e| matches!(&e.kind, RunEventKind::NodeCancelled { node, .. } if *node == e_index)));
    assert!(matches!(events.last().map(|e| &e.kind), Some(RunEventKind::RunCompleted { status: RunStatus::Failed, .. })));
}

#[test]
fn cancellation_stops_dispatch_between_nodes() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let mut reg = StageRegistry::new();
    reg.register(FnStage::new("a", &["projections"], &["x"], move |ctx| {
                     trigger.cancel();
                     Ok(vec![ArtifactPayload::Array(ctx.primary_array()?.clone())])
                 }))
       .unwrap();
    reg.register(pass("b", "x", "y")).unwrap();
    reg.register(pass("c", "y", "z")).unwrap();

    let pipeline = Pipeline::new(&reg, Arc::new(ArtifactCache::default()), config(2));
    let out = pipeline.run_with_cancel(&PipelineRequest::new(["z"]), &raw(), &token).unwrap();
    assert_eq!(out.status, RunStatus::Cancelled);
    assert_eq!(out.diagnostic("a").unwrap().status, NodeState::Done);
    assert_eq!(out.diagnostic("b").unwrap().status, NodeState::Cancelled);
    assert_eq!(out.diagnostic("c").unwrap().status, NodeState::Cancelled);
    assert!(out.artifacts.is_empty());
}

#[test]
fn nodes_start_only_after_their_inputs_are_done() {
    // diamante: a -> (b, c) -> d, con demoras distintas
    let mut reg = StageRegistry::new();
    reg.register(slow("a", "projections", "x", 5)).unwrap();
    reg.register(slow("b", "x", "y1", 30)).unwrap();
    reg.register(slow("c", "x", "y2", 1)).unwrap();
    reg.register(FnStage::new("d", &["y1", "y2"], &["out"], |ctx| {
                     let a = ctx.array("y1")?;
                     let b = ctx.array("y2")?;
                     let data = a.data.iter().zip(&b.data).map(|(p, q)| p + q).collect();
                     Ok(vec![ArtifactPayload::Array(ArrayData::new(a.shape.clone(), data)?)])
                 }))
       .unwrap();

    let pipeline = Pipeline::new(&reg, Arc::new(ArtifactCache::default()), config(4));
    let request = PipelineRequest::new(["out"]);
    let graph = pipeline.plan(&request, &raw()).unwrap();
    let out = pipeline.run(&request, &raw()).unwrap();
    assert_eq!(out.require("out").unwrap().array().unwrap().data, vec![2.0; 16]);

    let mut finished_at: HashMap<usize, u64> = HashMap::new();
    for ev in pipeline.events_for(out.run_id) {
        match ev.kind {
            RunEventKind::NodeFinished { node, .. } => {
                finished_at.insert(node, ev.seq);
            }
            RunEventKind::NodeStarted { node, .. } => {
                for dep in &graph.node(node).unwrap().dependencies {
                    let done = finished_at.get(dep).copied();
                    assert!(done.is_some_and(|seq| seq < ev.seq), "node {node} started before dependency {dep}");
                }
            }
            _ => {}
        }
    }
}

#[test]
fn concurrent_runs_compute_each_stage_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut reg = StageRegistry::new();
    for (id, input, output) in [("a", "projections", "x"), ("b", "x", "y")] {
        let calls = calls.clone();
        reg.register(FnStage::new(id, &[input], &[output], move |ctx| {
                         calls.fetch_add(1, Ordering::SeqCst);
                         thread::sleep(Duration::from_millis(40));
                         Ok(vec![ArtifactPayload::Array(ctx.primary_array()?.clone())])
                     }))
           .unwrap();
    }
    let pipeline = Pipeline::new(&reg, Arc::new(ArtifactCache::default()), config(2));
    let raw = raw();
    let request = PipelineRequest::new(["y"]);
    let outputs: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..4).map(|_| s.spawn(|| pipeline.run(&request, &raw).unwrap())).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(outputs.iter().all(|o| o.status == RunStatus::Completed));
    let first = outputs[0].require("y").unwrap();
    assert!(outputs.iter().all(|o| Arc::ptr_eq(o.require("y").unwrap(), first)));
}

#[test]
fn upstream_entries_stay_pinned_during_the_run() {
    let cache = Arc::new(ArtifactCache::new(CacheConfig { budget_bytes: 0 }));
    let upstream: Arc<OnceLock<String>> = Arc::default();
    let seen_pinned = Arc::new(AtomicUsize::new(0));

    let mut reg = StageRegistry::new();
    reg.register(pass("a", "projections", "x")).unwrap();
    let (c, fp, seen) = (cache.clone(), upstream.clone(), seen_pinned.clone());
    reg.register(FnStage::new("b", &["x"], &["y"], move |ctx| {
           if let Some(fp) = fp.get() {
               if c.contains(fp) && c.is_pinned(fp) {
                   seen.fetch_add(1, Ordering::SeqCst);
               }
           }
           Ok(vec![ArtifactPayload::Array(ctx.primary_array()?.clone())])
       }))
       .unwrap();

    let pipeline = Pipeline::new(&reg, cache.clone(), config(2));
    let req = PipelineRequest::new(["y"]);
    let a_fp = pipeline.plan(&req, &raw()).unwrap().find("a").unwrap().fingerprint.clone();
    upstream.set(a_fp.clone()).unwrap();

    let out = pipeline.run(&req, &raw()).unwrap();
    assert_eq!(out.status, RunStatus::Completed);
    assert_eq!(seen_pinned.load(Ordering::SeqCst), 1);
    // sin presupuesto, al soltar los pins todo se desaloja
    assert!(!cache.is_pinned(&a_fp));
    assert!(!cache.contains(&a_fp));
    assert!(cache.is_empty());
}

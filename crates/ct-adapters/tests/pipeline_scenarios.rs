use std::sync::Arc;

use ct_adapters::{ct_raw_inputs, minimal_registry, standard_registry, RECONSTRUCTION, VOLUME};
use ct_core::{ArrayData, ArtifactCache, CacheSource, NodeState, Pipeline, PipelineRequest, RawInputs, RunStatus,
              SchedulerConfig};
use serde_json::json;

fn config() -> SchedulerConfig {
    SchedulerConfig { workers: 4,
                      slice_chunk: 2,
                      fail_fast_default: false }
}

/// Disco uniforme centrado visto con open-beam 1000 y dark-field 100.
fn phantom(angles: usize, rows: usize, cols: usize) -> RawInputs {
    let (ob, df) = (1000.0f32, 100.0f32);
    let center = (cols as f64 - 1.0) / 2.0;
    let radius = cols as f64 / 4.0;
    let mut data = Vec::with_capacity(angles * rows * cols);
    for _ in 0..angles * rows {
        for c in 0..cols {
            let u = c as f64 - center;
            let chord = if u.abs() < radius { 2.0 * (radius * radius - u * u).sqrt() } else { 0.0 };
            let transmission = (-0.04 * chord).exp() as f32;
            data.push(df + (ob - df) * transmission);
        }
    }
    ct_raw_inputs(ArrayData::new(vec![angles, rows, cols], data).unwrap(),
                  ArrayData::filled(vec![2, rows, cols], ob),
                  ArrayData::filled(vec![2, rows, cols], df))
}

#[test]
fn minimal_chain_builds_three_nodes() {
    let reg = minimal_registry().unwrap();
    let cache = Arc::new(ArtifactCache::default());
    let pipeline = Pipeline::new(&reg, cache.clone(), config());
    let out = pipeline.run(&PipelineRequest::new([VOLUME]), &phantom(4, 8, 8)).unwrap();

    assert_eq!(out.status, RunStatus::Completed);
    assert_eq!(out.diagnostics.len(), 3);
    assert_eq!(cache.len(), 3);
    assert_eq!(out.require(VOLUME).unwrap().shape(), &[8, 8, 8]);
}

#[test]
fn changing_filter_reuses_normalize() {
    let reg = minimal_registry().unwrap();
    let cache = Arc::new(ArtifactCache::default());
    let pipeline = Pipeline::new(&reg, cache.clone(), config());
    let raw = phantom(4, 8, 8);
    let first = pipeline.run(&PipelineRequest::new([VOLUME]), &raw).unwrap();
    let second = pipeline.run(&PipelineRequest::new([VOLUME]).with_override("filter", json!({"threshold": 3.0})),
                              &raw)
                         .unwrap();

    let source = |stage: &str| second.diagnostic(stage).unwrap().cache_source;
    assert_eq!(source("normalize"), Some(CacheSource::Memory));
    assert_eq!(source("filter"), Some(CacheSource::Computed));
    assert_eq!(source("reconstruct"), Some(CacheSource::Computed));
    assert_eq!(first.diagnostic("normalize").unwrap().fingerprint,
               second.diagnostic("normalize").unwrap().fingerprint);
    assert_eq!(cache.len(), 5);
}

#[test]
fn integer_and_float_spellings_share_cache_entries() {
    let reg = minimal_registry().unwrap();
    let cache = Arc::new(ArtifactCache::default());
    let pipeline = Pipeline::new(&reg, cache.clone(), config());
    let raw = phantom(4, 8, 8);
    let first = pipeline.run(&PipelineRequest::new([VOLUME]).with_override("filter", json!({"kernel": 5, "threshold": 3})),
                             &raw)
                        .unwrap();
    let second =
        pipeline.run(&PipelineRequest::new([VOLUME]).with_override("filter", json!({"kernel": 5, "threshold": 3.0})),
                     &raw)
                .unwrap();

    assert_eq!(first.diagnostic("filter").unwrap().fingerprint,
               second.diagnostic("filter").unwrap().fingerprint);
    assert_eq!(second.diagnostic("filter").unwrap().cache_source, Some(CacheSource::Memory));
    assert_eq!(second.diagnostic("reconstruct").unwrap().cache_source, Some(CacheSource::Memory));
    assert_eq!(cache.len(), 3);
}

#[test]
fn standard_chain_reconstructs_the_phantom() {
    let reg = standard_registry().unwrap();
    let pipeline = Pipeline::new(&reg, Arc::new(ArtifactCache::default()), config());
    // el disco centrado es idéntico en todo ángulo: ring removal lo vería
    // como un anillo
    let req = PipelineRequest::new([RECONSTRUCTION, "rotation_center"]).with_override("ring_removal", json!({"window": 1}));
    let out = pipeline.run(&req, &phantom(12, 3, 16)).unwrap();

    assert_eq!(out.status, RunStatus::Completed);
    assert_eq!(out.diagnostics.len(), 7);
    assert!(out.diagnostics.iter().all(|d| d.status == NodeState::Done));
    let center = out.require("rotation_center").unwrap().scalar().unwrap();
    assert_eq!(center, 7.5);
    let volume = out.require(RECONSTRUCTION).unwrap().array().unwrap();
    assert_eq!(volume.shape, vec![3, 16, 16]);
    let middle = volume.data[(16 + 8) * 16 + 8];
    assert!(middle > 0.02 && middle < 0.06, "middle = {middle}");
    assert_eq!(volume.data[16 * 16], 0.0);
}

#[test]
fn identical_runs_are_bit_identical() {
    let reg = standard_registry().unwrap();
    let raw = phantom(8, 2, 12);
    let req = PipelineRequest::new([RECONSTRUCTION]);
    let a = Pipeline::new(&reg, Arc::new(ArtifactCache::default()), config()).run(&req, &raw).unwrap();
    let b = Pipeline::new(&reg,
                          Arc::new(ArtifactCache::default()),
                          SchedulerConfig { workers: 1,
                                            slice_chunk: 1,
                                            fail_fast_default: false }).run(&req, &raw)
                                                                       .unwrap();
    assert_eq!(a.run_fingerprint, b.run_fingerprint);
    assert_eq!(a.require(RECONSTRUCTION).unwrap().payload, b.require(RECONSTRUCTION).unwrap().payload);
}

#[test]
fn crop_override_changes_every_downstream_shape() {
    let reg = standard_registry().unwrap();
    let pipeline = Pipeline::new(&reg, Arc::new(ArtifactCache::default()), config());
    let req = PipelineRequest::new([RECONSTRUCTION]).with_override("crop", json!({"left": 2, "right": 2, "top": 1}));
    let out = pipeline.run(&req, &phantom(6, 4, 16)).unwrap();
    assert_eq!(out.require(RECONSTRUCTION).unwrap().shape(), &[3, 12, 12]);
}

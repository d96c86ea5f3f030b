use std::sync::Arc;

use ct_core::{ArrayData, ArtifactCache, ArtifactPayload, FnStage, Pipeline, PipelineRequest, RawInputs, SchedulerConfig,
              StageRegistry};

fn registry() -> StageRegistry {
    let mut reg = StageRegistry::new();
    reg.register(FnStage::new("log", &["projections"], &["attenuation"], |ctx| {
                     let arr = ctx.primary_array()?;
                     let data = arr.data.iter().map(|v| -(v.max(1e-6)).ln()).collect();
                     Ok(vec![ArtifactPayload::Array(ArrayData::new(arr.shape.clone(), data)?)])
                 }).per_slice())
       .unwrap();
    reg.register(FnStage::new("sum", &["attenuation"], &["total"], |ctx| {
                     let total: f64 = ctx.primary_array()?.data.iter().map(|v| *v as f64).sum();
                     Ok(vec![ArtifactPayload::Scalar(total)])
                 }))
       .unwrap();
    reg
}

fn raw() -> RawInputs {
    let data = (0..6 * 3 * 3).map(|i| 0.1 + (i % 7) as f32 * 0.1).collect();
    RawInputs::new().with("projections", ArrayData::new(vec![6, 3, 3], data).unwrap())
}

#[test]
fn identical_requests_produce_identical_artifacts() {
    let reg = registry();
    let request = PipelineRequest::new(["attenuation", "total"]);
    let run = |workers: usize, chunk: usize| {
        let config = SchedulerConfig { workers,
                                       slice_chunk: chunk,
                                       fail_fast_default: false };
        Pipeline::new(&reg, Arc::new(ArtifactCache::default()), config).run(&request, &raw()).unwrap()
    };
    let a = run(1, 1);
    let b = run(4, 4);
    assert_eq!(a.require("attenuation").unwrap().array().unwrap().data,
               b.require("attenuation").unwrap().array().unwrap().data);
    assert_eq!(a.require("total").unwrap().scalar(), b.require("total").unwrap().scalar());
    assert_eq!(a.run_fingerprint, b.run_fingerprint);
    assert_eq!(a.graph_hash, b.graph_hash);
    assert_eq!(a.require("total").unwrap().fingerprint, b.require("total").unwrap().fingerprint);
}

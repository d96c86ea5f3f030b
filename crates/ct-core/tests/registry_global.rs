use ct_core::{ArtifactPayload, FnStage, PipelineError, StageRegistry};

fn registry() -> StageRegistry {
    let mut reg = StageRegistry::new();
    reg.register(FnStage::new("normalize", &["projections"], &["normalized"], |_| Ok(vec![ArtifactPayload::Scalar(1.0)])))
       .unwrap();
    reg
}

#[test]
fn global_registry_is_init_once() {
    assert!(StageRegistry::global().is_none());
    let installed = StageRegistry::install_global(registry()).unwrap();
    assert_eq!(installed.producer_of("normalized"), Some("normalize"));

    let again = StageRegistry::install_global(registry());
    assert!(matches!(again, Err(PipelineError::Internal(_))));

    // global_or_init no invoca el init si ya existe
    let same = StageRegistry::global_or_init(|| panic!("must not rebuild")).unwrap();
    assert!(std::ptr::eq(same, installed));
}

//! `Reconstruction`: registro global estándar + cache + pipeline listos para
//! usar a partir de un `AppConfig`.

use std::sync::Arc;

use ct_adapters::standard_registry;
use ct_core::{ArtifactCache, JsonDirStore, Pipeline, PipelineOutput, PipelineRequest, RawInputs, StageRegistry};
use log::info;

use crate::config::AppConfig;
use crate::errors::AppError;

pub struct Reconstruction {
    pipeline: Pipeline<'static>,
    fail_fast: bool,
}

impl Reconstruction {
    /// Instala el registro estándar (una vez por proceso) y arma la cache,
    /// persistente si `cache_dir` está configurado.
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let registry = StageRegistry::global_or_init(standard_registry)?;
        let mut cache = ArtifactCache::new(config.cache_config());
        if let Some(dir) = &config.cache_dir {
            info!("persistent artifact cache at {}", dir.display());
            cache = cache.with_store(Arc::new(JsonDirStore::open(dir)?));
        }
        Ok(Self { pipeline: Pipeline::new(registry, Arc::new(cache), config.scheduler_config()),
                  fail_fast: config.fail_fast })
    }

    /// Request para `outputs` con el fail-fast configurado.
    pub fn request<I, S>(&self, outputs: I) -> PipelineRequest
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        PipelineRequest::new(outputs).fail_fast(self.fail_fast)
    }

    pub fn run(&self, request: &PipelineRequest, raw: &RawInputs) -> Result<PipelineOutput, AppError> {
        Ok(self.pipeline.run(request, raw)?)
    }

    pub fn pipeline(&self) -> &Pipeline<'static> {
        &self.pipeline
    }

    pub fn registry(&self) -> &StageRegistry {
        self.pipeline.registry()
    }
}

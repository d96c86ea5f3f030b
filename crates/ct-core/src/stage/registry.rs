//! Registro de stages.
//!
//! Se construye una sola vez al inicio del proceso (`register` toma `&mut
//! self`, por lo que no puede mutarse mientras haya lookups en curso) y luego
//! se pasa por referencia al `GraphBuilder`. `install_global` ofrece además
//! una instancia de proceso con semántica init-once.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use once_cell::sync::OnceCell;

use super::{StageDefinition, StageDescriptor};
use crate::errors::PipelineError;

static GLOBAL_REGISTRY: OnceCell<StageRegistry> = OnceCell::new();

#[derive(Debug, Default)]
pub struct StageRegistry {
    // id -> (versión -> stage); BTreeMap para iteración determinista
    stages: BTreeMap<String, BTreeMap<u32, Arc<dyn StageDefinition>>>,
    // artifact -> id del stage que lo produce
    producers: BTreeMap<String, String>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: StageDefinition + 'static>(&mut self, stage: S) -> Result<(), PipelineError> {
        self.register_arc(Arc::new(stage))
    }

    /// Registra un stage. Falla con `DuplicateStage` si ya existe el mismo
    /// id/versión y con `ConflictingProducer` si otro stage (de distinto id)
    /// ya produce alguno de sus outputs.
    pub fn register_arc(&mut self, stage: Arc<dyn StageDefinition>) -> Result<(), PipelineError> {
        let id = stage.id().to_string();
        let version = stage.version();
        if self.stages.get(&id).is_some_and(|versions| versions.contains_key(&version)) {
            return Err(PipelineError::DuplicateStage { name: id, version });
        }
        for out in stage.outputs() {
            if let Some(existing) = self.producers.get(&out) {
                if existing != &id {
                    return Err(PipelineError::ConflictingProducer { artifact: out,
                                                                    existing: existing.clone(),
                                                                    incoming: id });
                }
            }
        }
        for out in stage.outputs() {
            self.producers.insert(out, id.clone());
        }
        debug!("registered stage '{}' v{} outputs={:?}", id, version, stage.outputs());
        self.stages.entry(id).or_default().insert(version, stage);
        Ok(())
    }

    /// Última versión registrada del stage `name`.
    pub fn lookup(&self, name: &str) -> Result<&Arc<dyn StageDefinition>, PipelineError> {
        self.stages
            .get(name)
            .and_then(|versions| versions.values().next_back())
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))
    }

    pub fn lookup_version(&self, name: &str, version: u32) -> Result<&Arc<dyn StageDefinition>, PipelineError> {
        self.stages
            .get(name)
            .and_then(|versions| versions.get(&version))
            .ok_or_else(|| PipelineError::UnknownStage(format!("{name}@{version}")))
    }

    /// Id del stage que produce `artifact`, si existe.
    pub fn producer_of(&self, artifact: &str) -> Option<&str> {
        self.producers.get(artifact).map(|s| s.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    /// Descriptores de la última versión de cada stage, ordenados por id.
    pub fn descriptors(&self) -> Vec<StageDescriptor> {
        self.stages
            .values()
            .filter_map(|versions| versions.values().next_back())
            .map(|s| s.descriptor())
            .collect()
    }

    /// Cantidad de stages distintos (por id).
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Instala el registro de proceso. Sólo puede hacerse una vez.
    pub fn install_global(registry: StageRegistry) -> Result<&'static StageRegistry, PipelineError> {
        GLOBAL_REGISTRY.set(registry)
                       .map_err(|_| PipelineError::Internal("global stage registry already installed".into()))?;
        GLOBAL_REGISTRY.get()
                       .ok_or_else(|| PipelineError::Internal("global stage registry missing after install".into()))
    }

    /// Instala el registro devuelto por `init` si todavía no existe; en caso
    /// contrario devuelve el ya instalado (sin invocar `init`).
    pub fn global_or_init<F>(init: F) -> Result<&'static StageRegistry, PipelineError>
        where F: FnOnce() -> Result<StageRegistry, PipelineError>
    {
        GLOBAL_REGISTRY.get_or_try_init(init)
    }

    pub fn global() -> Option<&'static StageRegistry> {
        GLOBAL_REGISTRY.get()
    }
}

//! `FnStage`: stage respaldado por un closure. Útil para componer stages ad
//! hoc sin declarar un tipo nuevo.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};

use super::{Parallelism, StageDefinition, StageRunResult};
use crate::errors::StageError;
use crate::model::{ArtifactPayload, ExecutionContext};

type StageFn = dyn Fn(&ExecutionContext) -> Result<Vec<ArtifactPayload>, StageError> + Send + Sync;

#[derive(Clone)]
pub struct FnStage {
    id: String,
    version: u32,
    inputs: Vec<String>,
    outputs: Vec<String>,
    parallelism: Parallelism,
    defaults: Value,
    func: Arc<StageFn>,
}

impl FnStage {
    pub fn new<F>(id: &str, inputs: &[&str], outputs: &[&str], func: F) -> Self
        where F: Fn(&ExecutionContext) -> Result<Vec<ArtifactPayload>, StageError> + Send + Sync + 'static
    {
        Self { id: id.to_string(),
               version: 1,
               inputs: inputs.iter().map(|s| s.to_string()).collect(),
               outputs: outputs.iter().map(|s| s.to_string()).collect(),
               parallelism: Parallelism::WholeVolume,
               defaults: json!({}),
               func: Arc::new(func) }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn per_slice(mut self) -> Self {
        self.parallelism = Parallelism::PerSlice;
        self
    }

    pub fn with_defaults(mut self, defaults: Value) -> Self {
        self.defaults = defaults;
        self
    }
}

impl fmt::Debug for FnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStage")
         .field("id", &self.id)
         .field("version", &self.version)
         .field("inputs", &self.inputs)
         .field("outputs", &self.outputs)
         .field("parallelism", &self.parallelism)
         .finish()
    }
}

impl StageDefinition for FnStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn inputs(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn outputs(&self) -> Vec<String> {
        self.outputs.clone()
    }

    fn parallelism(&self) -> Parallelism {
        self.parallelism
    }

    fn base_params(&self) -> Value {
        self.defaults.clone()
    }

    fn run(&self, ctx: &ExecutionContext) -> StageRunResult {
        (self.func)(ctx).into()
    }
}

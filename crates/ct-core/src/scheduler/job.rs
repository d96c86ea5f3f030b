//! Trabajo de un nodo despachado al pool: resuelve vía cache y, en caso de
//! miss, ejecuta el stage (completo o subdividido por slices).

use std::any::Any;
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use indexmap::IndexMap;
use log::debug;
use rayon::prelude::*;
use serde_json::Value;

use crate::cache::{ArtifactCache, CacheLookup};
use crate::errors::{StageError, StageExecutionError};
use crate::model::{ArrayData, Artifact, ArtifactBundle, ArtifactPayload, ArtifactRef, ExecutionContext};
use crate::stage::{Parallelism, StageDefinition};

/// Datos (owned) que viajan al worker.
pub(crate) struct NodeJob {
    pub stage: Arc<dyn StageDefinition>,
    pub stage_id: String,
    pub params: Value,
    pub fingerprint: String,
    pub outputs: Vec<String>,
    pub output_fingerprints: Vec<String>,
    pub parallelism: Parallelism,
    pub inputs: IndexMap<String, ArtifactRef>,
    pub slice_chunk: usize,
    pub cache: Arc<ArtifactCache>,
}

impl NodeJob {
    pub(crate) fn run(self) -> Result<CacheLookup, StageExecutionError> {
        let cache = Arc::clone(&self.cache);
        cache.get_or_compute(&self.fingerprint, || self.compute())
    }

    fn fail(&self, error: StageError) -> StageExecutionError {
        StageExecutionError::new(self.stage_id.clone(), self.params.clone(), self.fingerprint.clone(), error)
    }

    fn compute(&self) -> Result<ArtifactBundle, StageExecutionError> {
        let ctx = ExecutionContext::new(self.stage_id.clone(), self.inputs.clone(), self.params.clone());
        let payloads = match self.parallelism {
                           Parallelism::PerSlice => self.run_sliced(&ctx),
                           Parallelism::WholeVolume => invoke(self.stage.as_ref(), &ctx),
                       }.map_err(|e| self.fail(e))?;
        if payloads.len() != self.outputs.len() {
            return Err(self.fail(StageError::OutputArity { expected: self.outputs.len(),
                                                           found: payloads.len() }));
        }
        let artifacts = self.outputs
                            .iter()
                            .zip(self.output_fingerprints.iter())
                            .zip(payloads)
                            .map(|((name, fp), payload)| Arc::new(Artifact::produced(name, &self.stage_id, fp.clone(), payload)))
                            .collect();
        Ok(ArtifactBundle { fingerprint: self.fingerprint.clone(),
                            stage_id: self.stage_id.clone(),
                            artifacts })
    }

    /// Subdivide el input primario en rangos de `slice_chunk` slices, los
    /// ejecuta en paralelo sobre el mismo pool y concatena cada salida en
    /// orden de índice.
    fn run_sliced(&self, ctx: &ExecutionContext) -> Result<Vec<ArtifactPayload>, StageError> {
        let frames = ctx.primary_array()?.frames();
        let ranges = slice_ranges(frames, self.slice_chunk);
        if ranges.len() <= 1 {
            return invoke(self.stage.as_ref(), ctx);
        }
        debug!("stage '{}': {} frames in {} slice ranges", self.stage_id, frames, ranges.len());
        let stage = self.stage.as_ref();
        let parts: Vec<Vec<ArtifactPayload>> = ranges.into_par_iter()
                                                     .map(|range| {
                                                         let sub = ctx.slice_primary(range)?;
                                                         invoke(stage, &sub)
                                                     })
                                                     .collect::<Result<_, StageError>>()?;
        concat_parts(parts, self.outputs.len())
    }
}

pub(crate) fn slice_ranges(frames: usize, chunk: usize) -> Vec<Range<usize>> {
    let chunk = chunk.max(1);
    (0..frames).step_by(chunk).map(|start| start..(start + chunk).min(frames)).collect()
}

fn concat_parts(parts: Vec<Vec<ArtifactPayload>>, expected: usize) -> Result<Vec<ArtifactPayload>, StageError> {
    let mut columns: Vec<Vec<ArrayData>> = (0..expected).map(|_| Vec::with_capacity(parts.len())).collect();
    for part in parts {
        if part.len() != expected {
            return Err(StageError::OutputArity { expected,
                                                 found: part.len() });
        }
        for (column, payload) in columns.iter_mut().zip(part) {
            let array = payload.into_array()
                               .ok_or_else(|| StageError::InvalidInput("per-slice stages must produce arrays".into()))?;
            column.push(array);
        }
    }
    columns.iter()
           .map(|column| ArrayData::concat_axis0(column).map(ArtifactPayload::Array))
           .collect()
}

/// Ejecuta el stage convirtiendo un pánico en `StageError::Panicked`.
fn invoke(stage: &dyn StageDefinition, ctx: &ExecutionContext) -> Result<Vec<ArtifactPayload>, StageError> {
    match catch_unwind(AssertUnwindSafe(|| stage.run(ctx))) {
        Ok(result) => result.into_result(),
        Err(payload) => Err(StageError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

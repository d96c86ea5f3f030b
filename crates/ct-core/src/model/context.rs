use std::ops::Range;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{ArrayData, ArtifactPayload, ArtifactRef};
use crate::errors::StageError;

/// Contexto de ejecución entregado a `StageDefinition::run`.
///
/// `inputs` sigue el orden de slots declarado por el stage; el primero es el
/// input "primario" (el que se subdivide en stages per-slice).
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub stage_id: String,
    pub inputs: IndexMap<String, ArtifactRef>,
    pub params: Value, // parámetros resueltos (defaults + overrides)
    pub slice_range: Option<Range<usize>>, // Some cuando se ejecuta un sub-rango
}

impl ExecutionContext {
    pub fn new(stage_id: impl Into<String>, inputs: IndexMap<String, ArtifactRef>, params: Value) -> Self {
        Self { stage_id: stage_id.into(),
               inputs,
               params,
               slice_range: None }
    }

    pub fn input(&self, name: &str) -> Result<&ArtifactRef, StageError> {
        self.inputs.get(name).ok_or_else(|| StageError::MissingInput(name.to_string()))
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.contains_key(name)
    }

    /// Input `name` como arreglo.
    pub fn array(&self, name: &str) -> Result<&ArrayData, StageError> {
        self.input(name)?
            .array()
            .ok_or_else(|| StageError::InvalidInput(format!("input '{name}' is not an array")))
    }

    pub fn scalar(&self, name: &str) -> Result<f64, StageError> {
        self.input(name)?
            .scalar()
            .ok_or_else(|| StageError::InvalidInput(format!("input '{name}' is not a scalar")))
    }

    /// Input arreglo en la posición `slot`.
    pub fn array_at(&self, slot: usize) -> Result<&ArrayData, StageError> {
        let (name, art) = self.inputs
                              .get_index(slot)
                              .ok_or_else(|| StageError::MissingInput(format!("slot #{slot}")))?;
        art.array()
           .ok_or_else(|| StageError::InvalidInput(format!("input '{name}' is not an array")))
    }

    pub fn primary_array(&self) -> Result<&ArrayData, StageError> {
        self.array_at(0)
    }

    /// Decodifica los params al tipo del stage.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, StageError> {
        serde_json::from_value(self.params.clone())
            .map_err(|e| StageError::InvalidInput(format!("params for '{}': {e}", self.stage_id)))
    }

    /// Contexto derivado donde el input primario se reemplaza por el
    /// sub-rango `range` de su eje 0. Los demás inputs se comparten.
    pub fn slice_primary(&self, range: Range<usize>) -> Result<ExecutionContext, StageError> {
        let mut inputs = self.inputs.clone();
        let (_, primary) = inputs.get_index_mut(0)
                                 .ok_or_else(|| StageError::MissingInput("slot #0".into()))?;
        let sliced = primary.array()
                            .ok_or_else(|| StageError::InvalidInput("per-slice primary input must be an array".into()))?
                            .slice_axis0(range.clone())?;
        *primary = Arc::new(primary.with_payload(ArtifactPayload::Array(sliced)));
        Ok(ExecutionContext { stage_id: self.stage_id.clone(),
                              inputs,
                              params: self.params.clone(),
                              slice_range: Some(range) })
    }
}

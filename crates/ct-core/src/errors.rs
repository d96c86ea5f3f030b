//! Errores del core.
//!
//! Dos familias:
//! - `PipelineError`: errores detectados antes de ejecutar (registro, grafo,
//!   request) más el agregado `PipelineExecution` de fail-fast.
//! - `StageError` / `StageExecutionError`: fallos levantados por el código
//!   numérico de un stage; el segundo envuelve al primero con la identidad
//!   exacta del nodo (stage, params, fingerprint) para poder reproducirlo.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error levantado por la implementación de un stage.
#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum StageError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("missing input artifact '{0}'")]
    MissingInput(String),
    #[error("stage produced {found} outputs, expected {expected}")]
    OutputArity { expected: usize, found: usize },
    #[error("kernel failure: {0}")]
    Kernel(String),
    #[error("stage panicked: {0}")]
    Panicked(String),
}

/// Reporte de fallo de un nodo: stage, parámetros resueltos, fingerprint del
/// artifact que falló y error subyacente.
#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[error("stage '{stage_id}' failed (fingerprint {fingerprint}): {error}")]
pub struct StageExecutionError {
    pub stage_id: String,
    pub params: Value,
    pub fingerprint: String,
    #[source]
    pub error: StageError,
}

impl StageExecutionError {
    pub fn new(stage_id: impl Into<String>, params: Value, fingerprint: impl Into<String>, error: StageError) -> Self {
        Self { stage_id: stage_id.into(),
               params,
               fingerprint: fingerprint.into(),
               error }
    }
}

/// Errores de orquestación visibles para el llamador del pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown stage '{0}'")]
    UnknownStage(String),
    #[error("stage '{name}' version {version} already registered")]
    DuplicateStage { name: String, version: u32 },
    #[error("artifact '{artifact}' already produced by stage '{existing}', cannot register '{incoming}'")]
    ConflictingProducer { artifact: String, existing: String, incoming: String },
    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
    #[error("unresolved artifact '{artifact}'{}", requirer_suffix(.required_by))]
    UnresolvedArtifact { artifact: String, required_by: Option<String> },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("pipeline execution aborted: {0}")]
    PipelineExecution(Box<StageExecutionError>),
    #[error("internal: {0}")]
    Internal(String),
}

fn requirer_suffix(required_by: &Option<String>) -> String {
    match required_by {
        Some(stage) => format!(" (required by stage '{stage}')"),
        None => String::new(),
    }
}

impl PipelineError {
    /// Indica si el error se detectó antes de ejecutar cualquier stage.
    pub fn is_pre_execution(&self) -> bool {
        !matches!(self, PipelineError::PipelineExecution(_) | PipelineError::Internal(_))
    }
}

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::cache::{CacheSource, CacheStats};
use crate::errors::{PipelineError, StageExecutionError};
use crate::model::ArtifactRef;
use crate::stage::NodeState;

/// Estado terminal de una corrida.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Todos los nodos terminaron `Done`.
    Completed,
    /// Al menos un nodo falló; las ramas independientes completaron.
    PartiallyFailed,
    /// Fail-fast detuvo la corrida en el primer fallo.
    Failed,
    /// La cancelación dejó nodos sin ejecutar.
    Cancelled,
}

/// Diagnóstico por nodo (timing, estado, origen en cache, error).
#[derive(Debug, Clone, Serialize)]
pub struct NodeDiagnostic {
    pub node_index: usize,
    pub stage_id: String,
    pub fingerprint: String,
    pub params: Value,
    pub status: NodeState,
    pub cache_source: Option<CacheSource>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error: Option<StageExecutionError>,
    /// Stage cuyo fallo impidió ejecutar este nodo.
    pub failed_upstream: Option<String>,
}

impl NodeDiagnostic {
    pub fn is_cache_hit(&self) -> bool {
        self.cache_source.is_some_and(CacheSource::is_hit)
    }
}

/// Resultado de `Pipeline::run`: artifacts pedidos + diagnósticos.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Outputs pedidos que llegaron a producirse, en orden del request.
    pub artifacts: IndexMap<String, ArtifactRef>,
    pub diagnostics: Vec<NodeDiagnostic>,
    /// Fallos originados en stages (sin los propagados).
    pub failures: Vec<StageExecutionError>,
    pub graph_hash: String,
    pub run_fingerprint: String,
    pub cache_stats: CacheStats,
}

impl PipelineOutput {
    pub fn artifact(&self, name: &str) -> Option<&ArtifactRef> {
        self.artifacts.get(name)
    }

    /// Como `artifact`, pero un output ausente (p.ej. por fallo de su rama)
    /// es un error.
    pub fn require(&self, name: &str) -> Result<&ArtifactRef, PipelineError> {
        self.artifacts.get(name).ok_or_else(|| PipelineError::UnresolvedArtifact { artifact: name.to_string(),
                                                                                  required_by: None })
    }

    pub fn diagnostic(&self, stage_id: &str) -> Option<&NodeDiagnostic> {
        self.diagnostics.iter().find(|d| d.stage_id == stage_id)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Nodos servidos desde cache (memoria, almacén o cómputo compartido).
    pub fn cache_hits(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_cache_hit()).count()
    }
}

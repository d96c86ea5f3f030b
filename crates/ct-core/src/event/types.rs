//! Tipos de evento de una corrida y estructura `RunEvent`.
//!
//! Rol en el pipeline:
//! - El scheduler emite un evento por cada transición observable de un nodo
//!   a un `EventStore` append-only.
//! - Con esos eventos se reconstruye el progreso de la corrida
//!   (`RunProgress::replay`) sin tocar estructuras mutables del scheduler.
//! - `RunEventKind` es el contrato observable y estable del motor.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::CacheSource;
use crate::errors::StageExecutionError;
use crate::pipeline::RunStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEventKind {
    /// Primer evento de un `run_id`: fija el hash del grafo y su tamaño.
    RunStarted { graph_hash: String, node_count: usize, targets: Vec<String> },
    /// Todas las dependencias del nodo están `Done`.
    NodeReady { node: usize, stage_id: String },
    /// El nodo fue despachado al pool.
    NodeStarted { node: usize, stage_id: String, fingerprint: String },
    /// El nodo terminó; `outputs` son los fingerprints de sus artifacts.
    NodeFinished {
        node: usize,
        stage_id: String,
        fingerprint: String,
        outputs: Vec<String>,
        cache_source: CacheSource,
    },
    /// El nodo falló. `upstream` es `Some(nodo)` cuando no se ejecutó porque
    /// una dependencia falló antes.
    NodeFailed {
        node: usize,
        stage_id: String,
        fingerprint: String,
        error: StageExecutionError,
        upstream: Option<usize>,
    },
    /// El nodo no llegó a despacharse (cancelación o fail-fast).
    NodeCancelled { node: usize, stage_id: String },
    /// Cierre de la corrida con el fingerprint agregado de los nodos `Done`.
    RunCompleted { status: RunStatus, run_fingerprint: String },
}

impl RunEventKind {
    pub fn node(&self) -> Option<usize> {
        match self {
            RunEventKind::NodeReady { node, .. }
            | RunEventKind::NodeStarted { node, .. }
            | RunEventKind::NodeFinished { node, .. }
            | RunEventKind::NodeFailed { node, .. }
            | RunEventKind::NodeCancelled { node, .. } => Some(*node),
            RunEventKind::RunStarted { .. } | RunEventKind::RunCompleted { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub seq: u64, // asignado por el EventStore (orden append)
    pub run_id: Uuid,
    pub kind: RunEventKind,
    pub ts: DateTime<Utc>, // metadato (no entra en fingerprints)
}

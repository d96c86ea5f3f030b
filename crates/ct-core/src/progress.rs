//! Progreso de una corrida reconstruido a partir de sus eventos (replay).
//!
//! No depende del scheduler: consume eventos en orden y actualiza un slot por
//! nodo. Sirve para reportar avance desde otro hilo o a posteriori.
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::CacheSource;
use crate::event::{RunEvent, RunEventKind};
use crate::pipeline::RunStatus;
use crate::stage::NodeState;

#[derive(Debug, Clone, Serialize)]
pub struct NodeProgress {
    pub stage_id: Option<String>,
    pub state: NodeState,
    pub fingerprint: Option<String>,
    pub cache_source: Option<CacheSource>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeProgress {
    fn pending() -> Self {
        Self { stage_id: None,
               state: NodeState::Pending,
               fingerprint: None,
               cache_source: None,
               started_at: None,
               finished_at: None }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunProgress {
    pub nodes: Vec<NodeProgress>,
    pub graph_hash: Option<String>,
    pub status: Option<RunStatus>,
    pub run_fingerprint: Option<String>,
}

impl RunProgress {
    pub fn replay(events: &[RunEvent], node_count: usize) -> Self {
        let mut nodes: Vec<NodeProgress> = (0..node_count).map(|_| NodeProgress::pending()).collect();
        let mut progress = RunProgress { nodes: Vec::new(),
                                         graph_hash: None,
                                         status: None,
                                         run_fingerprint: None };
        for ev in events {
            if let RunEventKind::RunStarted { graph_hash, node_count: n, .. } = &ev.kind {
                progress.graph_hash = Some(graph_hash.clone());
                if *n > nodes.len() {
                    nodes.resize_with(*n, NodeProgress::pending);
                }
                continue;
            }
            if let RunEventKind::RunCompleted { status, run_fingerprint } = &ev.kind {
                progress.status = Some(*status);
                progress.run_fingerprint = Some(run_fingerprint.clone());
                continue;
            }
            let Some(slot) = ev.kind.node().and_then(|i| nodes.get_mut(i)) else { continue };
            match &ev.kind {
                RunEventKind::NodeReady { stage_id, .. } => {
                    slot.stage_id = Some(stage_id.clone());
                    slot.state = NodeState::Ready;
                }
                RunEventKind::NodeStarted { stage_id, fingerprint, .. } => {
                    slot.stage_id = Some(stage_id.clone());
                    slot.state = NodeState::Running;
                    slot.fingerprint = Some(fingerprint.clone());
                    slot.started_at = Some(ev.ts);
                }
                RunEventKind::NodeFinished { fingerprint, cache_source, .. } => {
                    slot.state = NodeState::Done;
                    slot.fingerprint = Some(fingerprint.clone());
                    slot.cache_source = Some(*cache_source);
                    slot.finished_at = Some(ev.ts);
                }
                RunEventKind::NodeFailed { stage_id, fingerprint, .. } => {
                    slot.stage_id = Some(stage_id.clone());
                    slot.state = NodeState::Failed;
                    slot.fingerprint = Some(fingerprint.clone());
                    slot.finished_at = Some(ev.ts);
                }
                RunEventKind::NodeCancelled { stage_id, .. } => {
                    slot.stage_id = Some(stage_id.clone());
                    slot.state = NodeState::Cancelled;
                }
                RunEventKind::RunStarted { .. } | RunEventKind::RunCompleted { .. } => {}
            }
        }
        progress.nodes = nodes;
        progress
    }

    pub fn count(&self, state: NodeState) -> usize {
        self.nodes.iter().filter(|n| n.state == state).count()
    }

    /// Fracción de nodos en estado terminal (0.0..=1.0).
    pub fn fraction_done(&self) -> f64 {
        if self.nodes.is_empty() {
            return 1.0;
        }
        let terminal = self.nodes.iter().filter(|n| n.state.is_terminal()).count();
        terminal as f64 / self.nodes.len() as f64
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventStore, InMemoryEventStore};
    use uuid::Uuid;

    #[test]
    fn replay_tracks_node_states() {
        let mut store = InMemoryEventStore::new();
        let run = Uuid::new_v4();
        store.append_kind(run, RunEventKind::RunStarted { graph_hash: "g".into(), node_count: 2, targets: vec![] });
        store.append_kind(run, RunEventKind::NodeReady { node: 0, stage_id: "normalize".into() });
        store.append_kind(run,
                          RunEventKind::NodeStarted { node: 0,
                                                      stage_id: "normalize".into(),
                                                      fingerprint: "f0".into() });
        store.append_kind(run,
                          RunEventKind::NodeFinished { node: 0,
                                                       stage_id: "normalize".into(),
                                                       fingerprint: "f0".into(),
                                                       outputs: vec![],
                                                       cache_source: CacheSource::Memory });
        let mid = RunProgress::replay(&store.list(run), 0);
        assert_eq!(mid.nodes.len(), 2);
        assert_eq!(mid.nodes[0].state, NodeState::Done);
        assert_eq!(mid.nodes[1].state, NodeState::Pending);
        assert_eq!(mid.fraction_done(), 0.5);
        assert!(!mid.is_finished());

        store.append_kind(run, RunEventKind::NodeCancelled { node: 1, stage_id: "filter".into() });
        store.append_kind(run,
                          RunEventKind::RunCompleted { status: RunStatus::Cancelled,
                                                       run_fingerprint: "r".into() });
        let done = RunProgress::replay(&store.list(run), 2);
        assert_eq!(done.count(NodeState::Cancelled), 1);
        assert_eq!(done.status, Some(RunStatus::Cancelled));
        assert_eq!(done.nodes[0].cache_source, Some(CacheSource::Memory));
    }
}

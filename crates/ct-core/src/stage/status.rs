use serde::{Deserialize, Serialize};

/// Estado de un nodo de ejecución.
///
/// Las transiciones válidas son:
/// - `Pending` -> `Ready` | `Failed` (ancestro falló) | `Cancelled`
/// - `Ready` -> `Running` | `Failed` (ancestro falló) | `Cancelled`
/// - `Running` -> `Done` | `Failed`
///
/// `Done`, `Failed` y `Cancelled` son terminales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Falta al menos un input.
    Pending,
    /// Todos los inputs disponibles; espera un worker.
    Ready,
    /// En ejecución.
    Running,
    /// Finalizó correctamente (computado o servido desde cache).
    Done,
    /// Falló, o falló uno de sus ancestros.
    Failed,
    /// No llegó a ejecutarse por cancelación o fail-fast.
    Cancelled,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Done | NodeState::Failed | NodeState::Cancelled)
    }

    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        matches!((self, next),
                 (Pending, Ready) | (Pending, Failed) | (Pending, Cancelled) | (Ready, Running) | (Ready, Failed) | (Ready, Cancelled) | (Running, Done) | (Running, Failed))
    }
}

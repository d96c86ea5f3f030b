//! Slot de cómputo en curso (single-flight): el líder publica el resultado y
//! los suscriptores bloquean hasta verlo.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

use crate::errors::StageExecutionError;
use crate::model::ArtifactBundle;

pub(crate) type FlightResult = Result<Arc<ArtifactBundle>, StageExecutionError>;

#[derive(Default)]
pub(crate) struct InFlight {
    result: Mutex<Option<FlightResult>>,
    ready: Condvar,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Bloquea hasta que el líder publique.
    pub(crate) fn wait(&self) -> FlightResult {
        let mut guard = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = guard.as_ref() {
                return result.clone();
            }
            guard = self.ready.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Publica el resultado una única vez; publicaciones posteriores se
    /// ignoran.
    pub(crate) fn publish(&self, result: FlightResult) {
        let mut guard = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(result);
        }
        self.ready.notify_all();
    }
}

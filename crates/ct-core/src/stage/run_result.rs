use crate::errors::StageError;
use crate::model::ArtifactPayload;

/// Resultado abstracto de ejecutar un stage. `outputs` sigue el orden de
/// `StageDefinition::outputs`.
#[derive(Debug)]
pub enum StageRunResult {
    Success { outputs: Vec<ArtifactPayload> },
    Failure { error: StageError },
}

impl StageRunResult {
    pub fn into_result(self) -> Result<Vec<ArtifactPayload>, StageError> {
        match self {
            StageRunResult::Success { outputs } => Ok(outputs),
            StageRunResult::Failure { error } => Err(error),
        }
    }
}

impl From<Result<Vec<ArtifactPayload>, StageError>> for StageRunResult {
    fn from(r: Result<Vec<ArtifactPayload>, StageError>) -> Self {
        match r {
            Ok(outputs) => StageRunResult::Success { outputs },
            Err(error) => StageRunResult::Failure { error },
        }
    }
}

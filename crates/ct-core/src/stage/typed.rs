use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::{Parallelism, StageDefinition, StageRunResult};
use crate::errors::StageError;
use crate::model::{ArtifactPayload, ExecutionContext};

/// Interfaz de alto nivel para definir stages con parámetros tipados.
///
/// Implementadores escriben `run_typed` con `Params` concretos; el adaptador
/// (abajo) expone la interfaz neutra `StageDefinition`, y la validación de
/// parámetros se reduce a que deserialicen en `Params`.
pub trait TypedStage: Send + Sync + std::fmt::Debug {
    /// Parámetros (de)serializables con defaults deterministas.
    type Params: DeserializeOwned + Serialize + Clone + Default;

    fn id(&self) -> &str;

    fn version(&self) -> u32 {
        1
    }

    fn inputs(&self) -> Vec<String>;

    fn outputs(&self) -> Vec<String>;

    fn parallelism(&self) -> Parallelism {
        Parallelism::WholeVolume
    }

    fn params_default(&self) -> Self::Params {
        Default::default()
    }

    /// Validación semántica de los parámetros ya decodificados.
    fn check_params(&self, _params: &Self::Params) -> Result<(), String> {
        Ok(())
    }

    fn run_typed(&self, ctx: &ExecutionContext, params: Self::Params) -> Result<Vec<ArtifactPayload>, StageError>;
}

// -------------------------------------------------------------
// Adaptador: cualquier `TypedStage` implementa `StageDefinition` neutro.
// -------------------------------------------------------------
impl<T> StageDefinition for T where T: TypedStage + 'static
{
    fn id(&self) -> &str {
        <T as TypedStage>::id(self)
    }

    fn version(&self) -> u32 {
        <T as TypedStage>::version(self)
    }

    fn inputs(&self) -> Vec<String> {
        <T as TypedStage>::inputs(self)
    }

    fn outputs(&self) -> Vec<String> {
        <T as TypedStage>::outputs(self)
    }

    fn parallelism(&self) -> Parallelism {
        <T as TypedStage>::parallelism(self)
    }

    fn base_params(&self) -> Value {
        serde_json::to_value(self.params_default()).unwrap_or_else(|_| Value::Object(Default::default()))
    }

    // `3` y `3.0` decodifican al mismo `Params`; se re-serializa para que
    // ambos hasheen igual.
    fn normalize_params(&self, params: &Value) -> Result<Value, String> {
        let decoded: T::Params = serde_json::from_value(params.clone()).map_err(|e| e.to_string())?;
        self.check_params(&decoded)?;
        serde_json::to_value(&decoded).map_err(|e| e.to_string())
    }

    fn run(&self, ctx: &ExecutionContext) -> StageRunResult {
        match ctx.params_as::<T::Params>() {
            Ok(params) => self.run_typed(ctx, params).into(),
            Err(error) => StageRunResult::Failure { error },
        }
    }
}

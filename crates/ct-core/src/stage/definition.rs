use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::run_result::StageRunResult;
use crate::model::ExecutionContext;

/// Pista de paralelismo de un stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parallelism {
    /// El input primario puede subdividirse por el eje 0; las salidas se
    /// concatenan en orden de índice.
    PerSlice,
    /// El stage se ejecuta de forma atómica sobre el volumen completo.
    WholeVolume,
}

/// Contrato uniforme de un stage. Implementaciones deben ser puras respecto a
/// inputs + params.
pub trait StageDefinition: Send + Sync + std::fmt::Debug {
    /// Identificador estable y único dentro del registro.
    fn id(&self) -> &str;

    /// Versión del stage; junto al id forma su identidad.
    fn version(&self) -> u32 {
        1
    }

    /// Slots de input (nombres de artifact) en orden.
    fn inputs(&self) -> Vec<String>;

    /// Nombres de los artifacts producidos, en el orden en que `run` los
    /// devuelve.
    fn outputs(&self) -> Vec<String>;

    fn parallelism(&self) -> Parallelism {
        Parallelism::WholeVolume
    }

    /// Parámetros por defecto (objeto JSON). Sus claves son las opciones
    /// reconocidas por el stage.
    fn base_params(&self) -> Value;

    /// Valida parámetros ya resueltos y devuelve su forma canónica, que es
    /// la que entra al fingerprint. Por defecto acepta todo sin cambios.
    fn normalize_params(&self, params: &Value) -> Result<Value, String> {
        Ok(params.clone())
    }

    /// Ejecución pura del stage. Debe usar únicamente inputs + params.
    fn run(&self, ctx: &ExecutionContext) -> StageRunResult;

    fn descriptor(&self) -> StageDescriptor {
        StageDescriptor { name: self.id().to_string(),
                          version: self.version(),
                          inputs: self.inputs(),
                          outputs: self.outputs(),
                          default_params: self.base_params(),
                          parallelism: self.parallelism() }
    }
}

/// Snapshot serializable del contrato de un stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub name: String,
    pub version: u32,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub default_params: Value,
    pub parallelism: Parallelism,
}

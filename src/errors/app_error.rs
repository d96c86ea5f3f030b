use thiserror::Error;

use ct_adapters::LoadError;
use ct_core::cache::StoreError;
use ct_core::PipelineError;

/// Errores de la capa de aplicación.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Error de configuración: {0}")]
    Config(String),
    #[error("Error en IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error del pipeline: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("Error de carga: {0}")]
    Load(#[from] LoadError),
    #[error("Error de cache persistente: {0}")]
    Store(#[from] StoreError),
}

//! ctflow: orquestación de pipelines de reconstrucción de tomografía de
//! neutrones.
//!
//! Esta librería es la capa de aplicación sobre `ct-core` y `ct-adapters`:
//! - `config`: configuración desde el entorno (`CTFLOW_*`, `.env`).
//! - `errors`: errores de aplicación.
//! - `phantom`: dataset sintético para demos y tests.
//! - `reconstruction`: pipeline estándar listo para usar.

pub mod config;
pub mod errors;
pub mod phantom;
pub mod reconstruction;

pub use config::AppConfig;
pub use errors::AppError;
pub use phantom::synthetic_dataset;
pub use reconstruction::Reconstruction;

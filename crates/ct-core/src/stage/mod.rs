//! Definiciones relacionadas a stages.
//!
//! Un stage es una unidad determinista que consume artifacts nombrados y
//! produce 1..n artifacts. Este módulo define:
//! - `StageDefinition`: contrato neutral usado por el engine.
//! - `TypedStage`: interfaz de alto nivel con parámetros tipados.
//! - `FnStage`: stage respaldado por un closure.
//! - `StageRegistry`: registro init-once de stages y productores.
//! - `NodeState`: máquina de estados de un nodo de ejecución.

pub mod definition;
pub mod function;
pub mod registry;
mod run_result;
mod status;
pub mod typed;

pub use definition::{Parallelism, StageDefinition, StageDescriptor};
pub use function::FnStage;
pub use registry::StageRegistry;
pub use run_result::StageRunResult;
pub use status::NodeState;
pub use typed::TypedStage;

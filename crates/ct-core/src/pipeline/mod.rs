//! Fachada del pipeline: request, ejecución y reporte.

mod facade;
mod report;
mod request;

pub use facade::Pipeline;
pub use report::{NodeDiagnostic, PipelineOutput, RunStatus};
pub use request::PipelineRequest;

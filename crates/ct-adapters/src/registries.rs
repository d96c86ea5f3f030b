//! Registros predefinidos de stages CT.

use ct_core::{PipelineError, StageRegistry};

use crate::binding::StageBinding;
use crate::stages::{CircularMaskStage, CropStage, GammaFilterStage, NormalizeStage, ReconstructStage, RingRemovalStage,
                    RotationCenterStage};

/// Artifact final de la cadena estándar.
pub const RECONSTRUCTION: &str = "reconstruction";
/// Artifact final de la cadena mínima.
pub const VOLUME: &str = "volume";

/// Cadena completa: crop -> normalize -> gamma_filter -> ring_removal ->
/// rotation_center -> reconstruct -> circular_mask.
pub fn standard_registry() -> Result<StageRegistry, PipelineError> {
    let mut reg = StageRegistry::new();
    reg.register(CropStage::new())?;
    reg.register(NormalizeStage::with_binding(StageBinding::new("normalize",
                                                                &["cropped_projections",
                                                                  "cropped_open_beam",
                                                                  "cropped_dark_field"],
                                                                &["normalized"])))?;
    reg.register(GammaFilterStage::new())?;
    reg.register(RingRemovalStage::new())?;
    reg.register(RotationCenterStage::new())?;
    reg.register(ReconstructStage::new())?;
    reg.register(CircularMaskStage::new())?;
    Ok(reg)
}

/// normalize -> filter -> reconstruct directamente sobre los datos crudos.
pub fn minimal_registry() -> Result<StageRegistry, PipelineError> {
    let mut reg = StageRegistry::new();
    reg.register(NormalizeStage::new())?;
    reg.register(GammaFilterStage::with_binding(StageBinding::new("filter", &["normalized"], &["filtered"])))?;
    reg.register(ReconstructStage::with_binding(StageBinding::new("reconstruct", &["filtered"], &[VOLUME])))?;
    Ok(reg)
}

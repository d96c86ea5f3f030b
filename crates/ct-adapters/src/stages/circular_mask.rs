//! Máscara circular: fuera del campo de visión reconstruido (el círculo
//! inscripto en cada corte) los valores se reemplazan por `fill`.

use ct_core::{ArrayData, ArtifactPayload, ExecutionContext, Parallelism, StageError, TypedStage};
use serde::{Deserialize, Serialize};

use super::util::stack_dims;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircularMaskParams {
    /// Radio de la máscara relativo al círculo inscripto.
    pub ratio: f64,
    pub fill: f32,
}

impl Default for CircularMaskParams {
    fn default() -> Self {
        Self { ratio: 0.95,
               fill: 0.0 }
    }
}

bound_stage!(CircularMaskStage, "circular_mask", ["volume"], ["reconstruction"]);

impl TypedStage for CircularMaskStage {
    type Params = CircularMaskParams;

    binding_accessors!();

    fn parallelism(&self) -> Parallelism {
        Parallelism::PerSlice
    }

    fn check_params(&self, params: &CircularMaskParams) -> Result<(), String> {
        if !(params.ratio > 0.0 && params.ratio <= 1.0) {
            return Err(format!("ratio must be in (0, 1], got {}", params.ratio));
        }
        Ok(())
    }

    fn run_typed(&self, ctx: &ExecutionContext, params: CircularMaskParams) -> Result<Vec<ArtifactPayload>, StageError> {
        let volume = ctx.primary_array()?;
        let (_, height, width) = stack_dims(volume, "volume")?;
        let radius = params.ratio * height.min(width) as f64 / 2.0;
        let (cy, cx) = ((height as f64 - 1.0) / 2.0, (width as f64 - 1.0) / 2.0);
        let mut data = volume.data.clone();
        if height * width > 0 {
            for slice in data.chunks_exact_mut(height * width) {
                for (i, v) in slice.iter_mut().enumerate() {
                    let (dy, dx) = ((i / width) as f64 - cy, (i % width) as f64 - cx);
                    if dy * dy + dx * dx > radius * radius {
                        *v = params.fill;
                    }
                }
            }
        }
        Ok(vec![ArtifactPayload::Array(ArrayData::new(volume.shape.clone(), data)?)])
    }
}

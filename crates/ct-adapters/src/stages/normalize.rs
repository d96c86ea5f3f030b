//! Normalización por open-beam / dark-field:
//! `(P - DF) / max(OB - DF, epsilon)`, acotado a >= 0.
//!
//! Los frames de calibración se promedian antes de aplicar. Per-slice: el
//! scheduler entrega sub-rangos de proyecciones; OB/DF llegan completos.

use ct_core::{ArrayData, ArtifactPayload, ExecutionContext, Parallelism, StageError, TypedStage};
use serde::{Deserialize, Serialize};

use super::util::{calibration_frame, stack_dims};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeParams {
    pub epsilon: f64,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        Self { epsilon: 1e-6 }
    }
}

bound_stage!(NormalizeStage,
             "normalize",
             ["projections", "open_beam", "dark_field"],
             ["normalized"]);

impl TypedStage for NormalizeStage {
    type Params = NormalizeParams;

    binding_accessors!();

    fn parallelism(&self) -> Parallelism {
        Parallelism::PerSlice
    }

    fn check_params(&self, params: &NormalizeParams) -> Result<(), String> {
        if params.epsilon.is_nan() || params.epsilon <= 0.0 {
            return Err(format!("epsilon must be positive, got {}", params.epsilon));
        }
        Ok(())
    }

    fn run_typed(&self, ctx: &ExecutionContext, params: NormalizeParams) -> Result<Vec<ArtifactPayload>, StageError> {
        let projections = ctx.array_at(0)?;
        let (_, rows, cols) = stack_dims(projections, "projections")?;
        if rows * cols == 0 {
            return Err(StageError::InvalidInput("projections have empty frames".into()));
        }
        let open_beam = calibration_frame(ctx.array_at(1)?, "open_beam", rows, cols)?;
        let dark_field = calibration_frame(ctx.array_at(2)?, "dark_field", rows, cols)?;
        let normalized = normalize(projections, &open_beam, &dark_field, params.epsilon as f32)?;
        Ok(vec![ArtifactPayload::Array(normalized)])
    }
}

fn normalize(projections: &ArrayData, open_beam: &[f32], dark_field: &[f32], epsilon: f32) -> Result<ArrayData, StageError> {
    let denominator: Vec<f32> = open_beam.iter()
                                         .zip(dark_field)
                                         .map(|(ob, df)| (ob - df).max(epsilon))
                                         .collect();
    let mut data = Vec::with_capacity(projections.len());
    for frame in projections.data.chunks_exact(denominator.len()) {
        data.extend(frame.iter()
                         .zip(dark_field)
                         .zip(&denominator)
                         .map(|((p, df), d)| ((p - df) / d).max(0.0)));
    }
    ArrayData::new(projections.shape.clone(), data)
}

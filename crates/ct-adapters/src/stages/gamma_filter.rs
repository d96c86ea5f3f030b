//! Filtro de gamma spots: píxeles aislados muy por encima de su vecindad
//! (impactos de rayos gamma en el detector) se reemplazan por la mediana
//! local. Valores no finitos también se reemplazan.

use ct_core::{ArrayData, ArtifactPayload, ExecutionContext, Parallelism, StageError, TypedStage};
use log::debug;
use serde::{Deserialize, Serialize};

use super::util::{median, stack_dims};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GammaFilterParams {
    /// Un píxel es outlier si supera `threshold` veces la mediana local.
    pub threshold: f64,
    /// Lado de la ventana cuadrada (impar).
    pub kernel: usize,
}

impl Default for GammaFilterParams {
    fn default() -> Self {
        Self { threshold: 1.5,
               kernel: 3 }
    }
}

bound_stage!(GammaFilterStage, "gamma_filter", ["normalized"], ["filtered"]);

impl TypedStage for GammaFilterStage {
    type Params = GammaFilterParams;

    binding_accessors!();

    fn parallelism(&self) -> Parallelism {
        Parallelism::PerSlice
    }

    fn check_params(&self, params: &GammaFilterParams) -> Result<(), String> {
        if params.threshold.is_nan() || params.threshold <= 0.0 {
            return Err(format!("threshold must be positive, got {}", params.threshold));
        }
        if params.kernel < 3 || params.kernel % 2 == 0 {
            return Err(format!("kernel must be an odd size >= 3, got {}", params.kernel));
        }
        Ok(())
    }

    fn run_typed(&self, ctx: &ExecutionContext, params: GammaFilterParams) -> Result<Vec<ArtifactPayload>, StageError> {
        let input = ctx.primary_array()?;
        let (_, rows, cols) = stack_dims(input, "normalized")?;
        let plane = rows * cols;
        if plane == 0 {
            return Ok(vec![ArtifactPayload::Array(input.clone())]);
        }
        let mut data = Vec::with_capacity(input.len());
        let mut replaced = 0;
        for frame in input.data.chunks_exact(plane) {
            replaced += filter_frame(frame, rows, cols, &params, &mut data);
        }
        debug!("{}: replaced {replaced} gamma spot(s)", ctx.stage_id);
        Ok(vec![ArtifactPayload::Array(ArrayData::new(input.shape.clone(), data)?)])
    }
}

/// Filtra un frame agregando el resultado a `out`; devuelve la cantidad de
/// píxeles reemplazados.
fn filter_frame(frame: &[f32], rows: usize, cols: usize, params: &GammaFilterParams, out: &mut Vec<f32>) -> usize {
    let half = params.kernel / 2;
    let threshold = params.threshold as f32;
    let mut window = Vec::with_capacity(params.kernel * params.kernel);
    let mut replaced = 0;
    for r in 0..rows {
        for c in 0..cols {
            window.clear();
            for rr in r.saturating_sub(half)..=(r + half).min(rows - 1) {
                let row = &frame[rr * cols..(rr + 1) * cols];
                window.extend(row[c.saturating_sub(half)..=(c + half).min(cols - 1)].iter()
                                                                                      .filter(|v| v.is_finite()));
            }
            let value = frame[r * cols + c];
            let local = if window.is_empty() { 0.0 } else { median(&mut window) };
            if !value.is_finite() || value > local * threshold {
                out.push(local);
                replaced += 1;
            } else {
                out.push(value);
            }
        }
    }
    replaced
}

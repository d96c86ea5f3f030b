//! Supresión de anillos. Un píxel defectuoso del detector deja una columna
//! con offset constante en todas las proyecciones (un anillo tras
//! reconstruir). Por cada fila del detector se promedia sobre los ángulos,
//! se suaviza ese perfil con una media móvil de `window` columnas y se resta
//! la diferencia a cada proyección.
//!
//! Necesita todas las proyecciones a la vez: volumen completo.

use ct_core::{ArrayData, ArtifactPayload, ExecutionContext, StageError, TypedStage};
use serde::{Deserialize, Serialize};

use super::util::stack_dims;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingRemovalParams {
    pub window: usize,
}

impl Default for RingRemovalParams {
    fn default() -> Self {
        Self { window: 5 }
    }
}

bound_stage!(RingRemovalStage, "ring_removal", ["filtered"], ["destriped"]);

impl TypedStage for RingRemovalStage {
    type Params = RingRemovalParams;

    binding_accessors!();

    fn check_params(&self, params: &RingRemovalParams) -> Result<(), String> {
        if params.window == 0 {
            return Err("window must be at least 1".into());
        }
        Ok(())
    }

    fn run_typed(&self, ctx: &ExecutionContext, params: RingRemovalParams) -> Result<Vec<ArtifactPayload>, StageError> {
        let input = ctx.primary_array()?;
        let (n, rows, cols) = stack_dims(input, "filtered")?;
        if n == 0 || rows * cols == 0 {
            return Ok(vec![ArtifactPayload::Array(input.clone())]);
        }
        let half = params.window / 2;
        let mut data = input.data.clone();
        for r in 0..rows {
            let mut profile = vec![0.0f64; cols];
            for a in 0..n {
                let base = (a * rows + r) * cols;
                for (p, v) in profile.iter_mut().zip(&input.data[base..base + cols]) {
                    *p += f64::from(*v);
                }
            }
            for p in profile.iter_mut() {
                *p /= n as f64;
            }
            let smooth = moving_average(&profile, half);
            for a in 0..n {
                let base = (a * rows + r) * cols;
                for c in 0..cols {
                    let offset = profile[c] - smooth[c];
                    data[base + c] = (f64::from(data[base + c]) - offset) as f32;
                }
            }
        }
        Ok(vec![ArtifactPayload::Array(ArrayData::new(input.shape.clone(), data)?)])
    }
}

/// Media móvil centrada con bordes replicados.
fn moving_average(values: &[f64], half: usize) -> Vec<f64> {
    let last = values.len() as isize - 1;
    let span = (2 * half + 1) as f64;
    (0..values.len() as isize).map(|i| {
                                  let sum: f64 = (i - half as isize..=i + half as isize).map(|j| values[j.clamp(0, last) as usize])
                                                                                        .sum();
                                  sum / span
                              })
                              .collect()
}

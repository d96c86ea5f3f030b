//! Estimación del centro de rotación.
//!
//! La primera proyección y la última espejada horizontalmente muestran el
//! objeto desde lados opuestos; el corrimiento `s` que mejor las alinea da el
//! eje: `center = (cols - 1 + s) / 2`.

use ct_core::{ArtifactPayload, ExecutionContext, StageError, TypedStage};
use log::debug;
use serde::{Deserialize, Serialize};

use super::util::stack_dims;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationCenterParams {
    /// Corrimiento máximo explorado (en píxeles). `None` = `cols / 2`.
    pub search_radius: Option<usize>,
}

bound_stage!(RotationCenterStage, "rotation_center", ["destriped"], ["rotation_center"]);

impl TypedStage for RotationCenterStage {
    type Params = RotationCenterParams;

    binding_accessors!();

    fn run_typed(&self, ctx: &ExecutionContext, params: RotationCenterParams) -> Result<Vec<ArtifactPayload>, StageError> {
        let input = ctx.primary_array()?;
        let (n, rows, cols) = stack_dims(input, "destriped")?;
        if n == 0 || rows * cols == 0 {
            return Err(StageError::Kernel("cannot estimate rotation center without projections".into()));
        }
        let first = input.frame(0).unwrap_or_default();
        let last = input.frame(n - 1).unwrap_or_default();
        let radius = params.search_radius.unwrap_or(cols / 2).min(cols - 1) as isize;

        let mut best = (0isize, f64::INFINITY);
        for shift in search_order(radius) {
            if let Some(err) = mirrored_error(first, last, rows, cols, shift) {
                if err < best.1 {
                    best = (shift, err);
                }
            }
        }
        let center = (cols as f64 - 1.0 + best.0 as f64) / 2.0;
        debug!("{}: shift {} -> center {center}", ctx.stage_id, best.0);
        Ok(vec![ArtifactPayload::Scalar(center)])
    }
}

/// 0, -1, 1, -2, 2, ...: ante empate gana el corrimiento más chico.
fn search_order(radius: isize) -> impl Iterator<Item = isize> {
    std::iter::once(0).chain((1..=radius).flat_map(|s| [-s, s]))
}

/// Error cuadrático medio entre `first[c]` y `mirror(last)[c - shift]` sobre
/// la zona de solapamiento.
fn mirrored_error(first: &[f32], last: &[f32], rows: usize, cols: usize, shift: isize) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for r in 0..rows {
        for c in 0..cols as isize {
            let m = c - shift;
            if m < 0 || m >= cols as isize {
                continue;
            }
            let a = f64::from(first[r * cols + c as usize]);
            let b = f64::from(last[r * cols + (cols - 1 - m as usize)]);
            sum += (a - b) * (a - b);
            count += 1;
        }
    }
    (count > 0).then(|| sum / count as f64)
}

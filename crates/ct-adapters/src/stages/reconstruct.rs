//! Reconstrucción por retroproyección filtrada (FBP, geometría paralela).
//!
//! Proyecciones `(n_angles, rows, cols)` -> volumen `(rows, cols, cols)`:
//! cada fila del detector es un sinograma independiente que se filtra y se
//! retroproyecta sobre un corte `cols x cols` centrado en el eje de rotación.
//!
//! El centro sale de `center`, o del segundo input (escalar) si el binding
//! lo declara, o del medio del detector.

use std::f64::consts::PI;

use ct_core::{ArrayData, ArtifactPayload, ExecutionContext, StageError, TypedStage};
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::util::stack_dims;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructParams {
    pub angular_range_deg: f64,
    /// Ángulos explícitos (uno por proyección); si falta se reparten
    /// uniformemente en `[0, angular_range_deg)`.
    pub angles_deg: Option<Vec<f64>>,
    pub center: Option<f64>,
    pub filter: String,
    /// Convierte transmisión en atenuación (`-ln`).
    pub log_transform: bool,
    pub epsilon: f64,
}

impl Default for ReconstructParams {
    fn default() -> Self {
        Self { angular_range_deg: 180.0,
               angles_deg: None,
               center: None,
               filter: "ramp".to_string(),
               log_transform: true,
               epsilon: 1e-6 }
    }
}

/// Filtro aplicado a cada fila del sinograma antes de retroproyectar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionFilter {
    /// Ram-Lak.
    Ramp,
    SheppLogan,
    /// Retroproyección sin filtrar.
    None,
}

impl ProjectionFilter {
    pub fn parse(name: &str) -> Result<Self, StageError> {
        match name {
            "ramp" | "ram-lak" => Ok(ProjectionFilter::Ramp),
            "shepp-logan" => Ok(ProjectionFilter::SheppLogan),
            "none" => Ok(ProjectionFilter::None),
            other => Err(StageError::Kernel(format!("unknown filter '{other}'"))),
        }
    }

    /// Respuesta espacial `h[k]` para `k` en `-(len-1)..=(len-1)`, indexada
    /// en `k + len - 1`.
    fn taps(self, len: usize) -> Vec<f64> {
        let reach = len as isize - 1;
        (-reach..=reach).map(|k| {
                            let kf = k as f64;
                            match self {
                                ProjectionFilter::Ramp if k == 0 => 0.25,
                                ProjectionFilter::Ramp if k % 2 == 0 => 0.0,
                                ProjectionFilter::Ramp => -1.0 / (PI * PI * kf * kf),
                                ProjectionFilter::SheppLogan => -2.0 / (PI * PI * (4.0 * kf * kf - 1.0)),
                                ProjectionFilter::None => {
                                    if k == 0 {
                                        1.0
                                    } else {
                                        0.0
                                    }
                                }
                            }
                        })
                        .collect()
    }
}

bound_stage!(ReconstructStage, "reconstruct", ["destriped", "rotation_center"], ["volume"]);

impl TypedStage for ReconstructStage {
    type Params = ReconstructParams;

    binding_accessors!();

    fn check_params(&self, params: &ReconstructParams) -> Result<(), String> {
        if !params.angular_range_deg.is_finite() || params.angular_range_deg <= 0.0 {
            return Err(format!("angular_range_deg must be positive, got {}", params.angular_range_deg));
        }
        if params.epsilon.is_nan() || params.epsilon <= 0.0 {
            return Err(format!("epsilon must be positive, got {}", params.epsilon));
        }
        Ok(())
    }

    fn run_typed(&self, ctx: &ExecutionContext, params: ReconstructParams) -> Result<Vec<ArtifactPayload>, StageError> {
        let projections = ctx.primary_array()?;
        let (n, _, cols) = stack_dims(projections, "projections")?;
        let filter = ProjectionFilter::parse(&params.filter)?;
        let angles = projection_angles(&params, n)?;
        let center = match (params.center, ctx.inputs.get_index(1)) {
            (Some(c), _) => c,
            (None, Some((name, art))) => art.scalar()
                                            .ok_or_else(|| StageError::InvalidInput(format!("input '{name}' must be a scalar center")))?,
            (None, None) => (cols as f64 - 1.0) / 2.0,
        };
        debug!("{}: {n} projection(s), center {center}, filter {filter:?}", ctx.stage_id);
        let volume = filtered_back_projection(projections, &angles, center, filter, params.log_transform, params.epsilon)?;
        Ok(vec![ArtifactPayload::Array(volume)])
    }
}

fn projection_angles(params: &ReconstructParams, n: usize) -> Result<Vec<f64>, StageError> {
    match &params.angles_deg {
        Some(angles) if angles.len() != n => {
            Err(StageError::Kernel(format!("{} angle(s) given for {n} projection(s)", angles.len())))
        }
        Some(angles) => Ok(angles.iter().map(|a| a.to_radians()).collect()),
        None => Ok((0..n).map(|i| (params.angular_range_deg * i as f64 / n as f64).to_radians())
                         .collect()),
    }
}

/// FBP de un stack de proyecciones. Los cortes son independientes y se
/// calculan en paralelo.
pub(crate) fn filtered_back_projection(projections: &ArrayData,
                                       angles: &[f64],
                                       center: f64,
                                       filter: ProjectionFilter,
                                       log_transform: bool,
                                       epsilon: f64)
                                       -> Result<ArrayData, StageError> {
    let (n, rows, cols) = stack_dims(projections, "projections")?;
    if n == 0 {
        return Err(StageError::Kernel("no projections to reconstruct".into()));
    }
    if angles.len() != n {
        return Err(StageError::Kernel(format!("{} angle(s) given for {n} projection(s)", angles.len())));
    }
    let mut volume = vec![0.0f32; rows * cols * cols];
    if cols == 0 {
        return ArrayData::new(vec![rows, cols, cols], volume);
    }
    let taps = filter.taps(cols);
    let trig: Vec<(f64, f64)> = angles.iter().map(|a| (a.cos(), a.sin())).collect();
    let scale = PI / n as f64;

    volume.par_chunks_mut(cols * cols).enumerate().for_each(|(row, slice)| {
        let sinogram: Vec<Vec<f64>> = (0..n).map(|a| {
                                                let base = (a * rows + row) * cols;
                                                let line: Vec<f64> = projections.data[base..base + cols]
                                                    .iter()
                                                    .map(|v| {
                                                        let v = f64::from(*v);
                                                        if log_transform {
                                                            -v.max(epsilon).ln()
                                                        } else {
                                                            v
                                                        }
                                                    })
                                                    .collect();
                                                convolve(&line, &taps)
                                            })
                                            .collect();
        for (y, out_row) in slice.chunks_exact_mut(cols).enumerate() {
            let yr = y as f64 - center;
            for (x, out) in out_row.iter_mut().enumerate() {
                let xr = x as f64 - center;
                let mut acc = 0.0;
                for (line, (cos, sin)) in sinogram.iter().zip(&trig) {
                    acc += interpolate(line, xr * cos + yr * sin + center);
                }
                *out = (acc * scale) as f32;
            }
        }
    });
    ArrayData::new(vec![rows, cols, cols], volume)
}

fn convolve(line: &[f64], taps: &[f64]) -> Vec<f64> {
    let reach = line.len() - 1;
    (0..line.len()).map(|c| line.iter().enumerate().map(|(j, v)| v * taps[c + reach - j]).sum())
                   .collect()
}

/// Interpolación lineal; fuera del detector vale 0.
fn interpolate(line: &[f64], t: f64) -> f64 {
    if t < 0.0 || t > (line.len() - 1) as f64 {
        return 0.0;
    }
    let i = t.floor() as usize;
    let frac = t - i as f64;
    match line.get(i + 1) {
        Some(next) => line[i] * (1.0 - frac) + next * frac,
        None => line[i],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::util::test_ctx;

    /// Transmisión de un disco uniforme centrado (igual en todo ángulo).
    fn disk_projections(n: usize, rows: usize, cols: usize, radius: f64, mu: f64) -> ArrayData {
        let center = (cols as f64 - 1.0) / 2.0;
        let mut data = Vec::with_capacity(n * rows * cols);
        for _ in 0..n * rows {
            for c in 0..cols {
                let u = c as f64 - center;
                let chord = if u.abs() < radius { 2.0 * (radius * radius - u * u).sqrt() } else { 0.0 };
                data.push((-mu * chord).exp() as f32);
            }
        }
        ArrayData::new(vec![n, rows, cols], data).unwrap()
    }

    #[test]
    fn disk_is_reconstructed_with_its_attenuation() {
        let (n, rows, cols) = (24, 2, 33);
        let mu = 0.05;
        let proj = disk_projections(n, rows, cols, 10.0, mu);
        let ctx = test_ctx("reconstruct", vec![("destriped", proj.into())]);
        let out = ReconstructStage::new().run_typed(&ctx, ReconstructParams::default()).unwrap();
        let vol = out[0].as_array().unwrap();
        assert_eq!(vol.shape, vec![rows, cols, cols]);
        let at = |r: usize, y: usize, x: usize| f64::from(vol.data[(r * cols + y) * cols + x]);
        let inside = at(0, 16, 16);
        assert!((inside - mu).abs() < 0.25 * mu, "inside = {inside}");
        let outside = at(1, 16, 30);
        assert!(outside.abs() < 0.25 * mu, "outside = {outside}");
    }

    #[test]
    fn center_input_is_used_when_bound() {
        let proj = disk_projections(8, 1, 9, 3.0, 0.1);
        let ctx = test_ctx("reconstruct", vec![("destriped", proj.into()), ("rotation_center", ArtifactPayload::Scalar(2.0))]);
        let shifted = ReconstructStage::new().run_typed(&ctx, ReconstructParams::default()).unwrap();
        let params = ReconstructParams { center: Some(2.0),
                                         ..Default::default() };
        let explicit = ReconstructStage::new().run_typed(&ctx, params).unwrap();
        assert_eq!(shifted, explicit);
    }

    #[test]
    fn kernel_errors() {
        let stage = ReconstructStage::new();
        let empty = test_ctx("reconstruct", vec![("destriped", ArrayData::zeros(vec![0, 4, 4]).into())]);
        assert!(matches!(stage.run_typed(&empty, ReconstructParams::default()), Err(StageError::Kernel(_))));

        let ctx = test_ctx("reconstruct", vec![("destriped", ArrayData::filled(vec![3, 2, 4], 1.0).into())]);
        let bad_angles = ReconstructParams { angles_deg: Some(vec![0.0, 90.0]),
                                             ..Default::default() };
        assert!(matches!(stage.run_typed(&ctx, bad_angles), Err(StageError::Kernel(_))));
        let bad_filter = ReconstructParams { filter: "hann-ish".into(),
                                             ..Default::default() };
        assert!(matches!(stage.run_typed(&ctx, bad_filter), Err(StageError::Kernel(_))));
    }

    #[test]
    fn unit_transmission_reconstructs_to_zero() {
        let ctx = test_ctx("reconstruct", vec![("destriped", ArrayData::filled(vec![4, 1, 5], 1.0).into())]);
        let out = ReconstructStage::new().run_typed(&ctx, ReconstructParams::default()).unwrap();
        assert!(out[0].as_array().unwrap().data.iter().all(|v| v.abs() < 1e-6));
    }
}

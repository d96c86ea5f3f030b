//! Dataset sintético determinista para demos y tests: un disco grande con
//! una inclusión más densa fuera del eje, en geometría paralela.

use ct_adapters::ct_raw_inputs;
use ct_core::{ArrayData, RawInputs};

const OPEN_BEAM: f32 = 1000.0;
const DARK_FIELD: f32 = 100.0;

/// Disco en coordenadas del corte relativas al eje de rotación (píxeles).
#[derive(Debug, Clone, Copy)]
struct Disk {
    x: f64,
    y: f64,
    radius: f64,
    attenuation: f64,
}

impl Disk {
    /// Integral de línea a lo largo del rayo `u` para la proyección `theta`.
    fn line_integral(&self, u: f64, theta: f64) -> f64 {
        let offset = u - (self.x * theta.cos() + self.y * theta.sin());
        if offset.abs() >= self.radius {
            return 0.0;
        }
        2.0 * self.attenuation * (self.radius * self.radius - offset * offset).sqrt()
    }
}

fn disks(cols: usize) -> [Disk; 2] {
    let w = cols as f64;
    [Disk { x: 0.0,
            y: 0.0,
            radius: 0.35 * w,
            attenuation: 0.02 },
     Disk { x: 0.15 * w,
            y: 0.05 * w,
            radius: 0.08 * w,
            attenuation: 0.05 }]
}

/// Proyecciones `(angles, rows, cols)` sobre 180° más dos frames de
/// open-beam y dark-field, listas como `RawInputs`.
pub fn synthetic_dataset(angles: usize, rows: usize, cols: usize) -> RawInputs {
    let center = (cols as f64 - 1.0) / 2.0;
    let phantom = disks(cols);
    let mut data = Vec::with_capacity(angles * rows * cols);
    for a in 0..angles {
        let theta = std::f64::consts::PI * a as f64 / angles as f64;
        let line: Vec<f32> = (0..cols).map(|c| {
                                          let u = c as f64 - center;
                                          let total: f64 = phantom.iter().map(|d| d.line_integral(u, theta)).sum();
                                          DARK_FIELD + (OPEN_BEAM - DARK_FIELD) * (-total).exp() as f32
                                      })
                                      .collect();
        for _ in 0..rows {
            data.extend_from_slice(&line);
        }
    }
    let projections = ArrayData { shape: vec![angles, rows, cols],
                                  data };
    ct_raw_inputs(projections,
                  ArrayData::filled(vec![2, rows, cols], OPEN_BEAM),
                  ArrayData::filled(vec![2, rows, cols], DARK_FIELD))
}

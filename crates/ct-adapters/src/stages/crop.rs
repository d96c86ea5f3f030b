//! Recorte de la región de interés sobre proyecciones y frames de
//! calibración (los tres con el mismo recorte).

use ct_core::{ArrayData, ArtifactPayload, ExecutionContext, StageError, TypedStage};
use serde::{Deserialize, Serialize};

/// Píxeles a descartar en cada borde.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropParams {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

bound_stage!(CropStage,
             "crop",
             ["projections", "open_beam", "dark_field"],
             ["cropped_projections", "cropped_open_beam", "cropped_dark_field"]);

impl TypedStage for CropStage {
    type Params = CropParams;

    binding_accessors!();

    fn run_typed(&self, ctx: &ExecutionContext, params: CropParams) -> Result<Vec<ArtifactPayload>, StageError> {
        let mut outputs = Vec::with_capacity(ctx.inputs.len());
        for slot in 0..ctx.inputs.len() {
            let arr = ctx.array_at(slot)?;
            outputs.push(ArtifactPayload::Array(crop_array(arr, &params)?));
        }
        Ok(outputs)
    }
}

/// Recorta un frame 2D o cada frame de un stack 3D.
fn crop_array(arr: &ArrayData, p: &CropParams) -> Result<ArrayData, StageError> {
    let (frames, rows, cols) = match arr.shape.as_slice() {
        [rows, cols] => (None, *rows, *cols),
        [n, rows, cols] => (Some(*n), *rows, *cols),
        other => return Err(StageError::InvalidInput(format!("cannot crop array of shape {other:?}"))),
    };
    let (Some(new_rows), Some(new_cols)) = (remaining(rows, p.top, p.bottom), remaining(cols, p.left, p.right)) else {
        return Err(StageError::InvalidInput(format!("crop {p:?} leaves no pixels of a {rows}x{cols} frame")));
    };
    let mut data = Vec::with_capacity(frames.unwrap_or(1) * new_rows * new_cols);
    for frame in arr.data.chunks_exact(rows * cols) {
        for r in p.top..rows - p.bottom {
            let start = r * cols + p.left;
            data.extend_from_slice(&frame[start..start + new_cols]);
        }
    }
    let shape = match frames {
        Some(n) => vec![n, new_rows, new_cols],
        None => vec![new_rows, new_cols],
    };
    ArrayData::new(shape, data)
}

/// Largo que queda tras quitar `a` y `b` de `len`; `None` si no queda nada.
fn remaining(len: usize, a: usize, b: usize) -> Option<usize> {
    a.checked_add(b).and_then(|cut| len.checked_sub(cut)).filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(shape: Vec<usize>) -> ArrayData {
        let n = shape.iter().product::<usize>();
        ArrayData::new(shape, (0..n).map(|v| v as f32).collect()).unwrap()
    }

    #[test]
    fn crops_every_frame_of_a_stack() {
        let p = CropParams { top: 1,
                             bottom: 0,
                             left: 1,
                             right: 1 };
        let out = crop_array(&ramp(vec![2, 3, 4]), &p).unwrap();
        assert_eq!(out.shape, vec![2, 2, 2]);
        assert_eq!(out.data, vec![5.0, 6.0, 9.0, 10.0, 17.0, 18.0, 21.0, 22.0]);
    }

    #[test]
    fn crops_single_frames() {
        let p = CropParams { top: 0,
                             bottom: 1,
                             left: 0,
                             right: 2 };
        let out = crop_array(&ramp(vec![3, 4]), &p).unwrap();
        assert_eq!(out.shape, vec![2, 2]);
        assert_eq!(out.data, vec![0.0, 1.0, 4.0, 5.0]);
    }

    #[test]
    fn crop_that_empties_the_frame_is_rejected() {
        let p = CropParams { top: 2,
                             bottom: 1,
                             left: 0,
                             right: 0 };
        assert!(matches!(crop_array(&ramp(vec![3, 4]), &p), Err(StageError::InvalidInput(_))));
    }

    #[test]
    fn overflowing_margins_are_invalid_input() {
        let p = CropParams { top: usize::MAX,
                             bottom: 1,
                             left: 0,
                             right: usize::MAX };
        assert!(matches!(crop_array(&ramp(vec![2, 3, 4]), &p), Err(StageError::InvalidInput(_))));
    }
}

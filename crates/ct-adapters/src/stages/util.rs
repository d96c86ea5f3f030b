use ct_core::{ArrayData, StageError};

/// Dimensiones `(frames, rows, cols)` de un stack 3D.
pub(crate) fn stack_dims(arr: &ArrayData, name: &str) -> Result<(usize, usize, usize), StageError> {
    match arr.shape.as_slice() {
        [n, rows, cols] => Ok((*n, *rows, *cols)),
        other => Err(StageError::InvalidInput(format!("'{name}' must be a 3-d stack, got shape {other:?}"))),
    }
}

/// Frame de calibración promedio (open-beam / dark-field) con shape
/// `(rows, cols)`. Acepta un frame 2D o un stack 3D.
pub(crate) fn calibration_frame(arr: &ArrayData, name: &str, rows: usize, cols: usize) -> Result<Vec<f32>, StageError> {
    let frame_shape = match arr.ndim() {
        2 => arr.shape.as_slice(),
        3 => arr.frame_shape(),
        d => return Err(StageError::InvalidInput(format!("'{name}' must be 2-d or 3-d, got {d}-d"))),
    };
    if frame_shape != [rows, cols] {
        return Err(StageError::ShapeMismatch(format!("'{name}' frames are {frame_shape:?}, projections are [{rows}, {cols}]")));
    }
    arr.mean_axis0()
}

/// Mediana de un buffer pequeño (se reordena in-place).
pub(crate) fn median(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.total_cmp(b));
    values[values.len() / 2]
}

#[cfg(test)]
pub(crate) fn test_ctx(stage_id: &str, inputs: Vec<(&str, ct_core::ArtifactPayload)>) -> ct_core::ExecutionContext {
    use std::sync::Arc;

    let inputs = inputs.into_iter()
                       .map(|(name, payload)| (name.to_string(), Arc::new(ct_core::Artifact::raw(name, payload))))
                       .collect();
    ct_core::ExecutionContext::new(stage_id, inputs, serde_json::json!({}))
}

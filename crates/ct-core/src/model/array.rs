//! Arreglo n-dimensional denso (f32, row-major) usado como payload de los
//! artifacts. El core no interpreta su semántica; sólo ofrece las operaciones
//! que necesita el scheduler (slicing y concatenación por el eje 0) y algunas
//! utilidades que comparten los stages.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::errors::StageError;
use crate::hashing::hash_bytes;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayData {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl ArrayData {
    /// Crea un arreglo validando que `data.len()` coincida con el producto de
    /// `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, StageError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(StageError::ShapeMismatch(format!("shape {:?} needs {} elements, got {}", shape, expected, data.len())));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let n = shape.iter().product();
        Self { shape,
               data: vec![0.0; n] }
    }

    /// Arreglo con todos los elementos en `value`.
    pub fn filled(shape: Vec<usize>, value: f32) -> Self {
        let n = shape.iter().product();
        Self { shape,
               data: vec![value; n] }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Cantidad de slices a lo largo del eje 0 (0 para arreglos escalares).
    pub fn frames(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Elementos por slice del eje 0.
    pub fn frame_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Shape de un slice del eje 0.
    pub fn frame_shape(&self) -> &[usize] {
        if self.shape.is_empty() {
            &[]
        } else {
            &self.shape[1..]
        }
    }

    /// Vista del slice `i` del eje 0.
    pub fn frame(&self, i: usize) -> Option<&[f32]> {
        let len = self.frame_len();
        if i >= self.frames() {
            return None;
        }
        Some(&self.data[i * len..(i + 1) * len])
    }

    /// Copia el sub-rango `range` del eje 0.
    pub fn slice_axis0(&self, range: Range<usize>) -> Result<ArrayData, StageError> {
        if range.start > range.end || range.end > self.frames() {
            return Err(StageError::InvalidInput(format!("slice {:?} out of bounds for {} frames", range, self.frames())));
        }
        let len = self.frame_len();
        let mut shape = self.shape.clone();
        shape[0] = range.end - range.start;
        Ok(ArrayData { shape,
                       data: self.data[range.start * len..range.end * len].to_vec() })
    }

    /// Concatena partes por el eje 0 respetando el orden recibido. Todas las
    /// partes deben compartir las dimensiones restantes.
    pub fn concat_axis0(parts: &[ArrayData]) -> Result<ArrayData, StageError> {
        let first = parts.first()
                         .ok_or_else(|| StageError::InvalidInput("cannot concatenate zero parts".into()))?;
        if first.ndim() == 0 {
            return Err(StageError::InvalidInput("cannot concatenate 0-d arrays".into()));
        }
        let trailing = first.frame_shape().to_vec();
        let mut frames = 0;
        let mut data = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
        for p in parts {
            if p.frame_shape() != trailing.as_slice() {
                return Err(StageError::ShapeMismatch(format!("cannot concatenate {:?} with {:?}", p.shape, first.shape)));
            }
            frames += p.frames();
            data.extend_from_slice(&p.data);
        }
        let mut shape = vec![frames];
        shape.extend(trailing);
        Ok(ArrayData { shape, data })
    }

    /// Promedio a lo largo del eje 0. Un arreglo 2D se devuelve tal cual.
    pub fn mean_axis0(&self) -> Result<Vec<f32>, StageError> {
        match self.ndim() {
            2 => Ok(self.data.clone()),
            3 => {
                let n = self.frames();
                if n == 0 {
                    return Err(StageError::InvalidInput("cannot average an empty stack".into()));
                }
                let len = self.frame_len();
                if len == 0 {
                    return Ok(Vec::new());
                }
                let mut acc = vec![0.0f64; len];
                for frame in self.data.chunks_exact(len) {
                    for (a, v) in acc.iter_mut().zip(frame) {
                        *a += f64::from(*v);
                    }
                }
                Ok(acc.into_iter().map(|a| (a / n as f64) as f32).collect())
            }
            d => Err(StageError::InvalidInput(format!("expected 2-d or 3-d array, got {d}-d"))),
        }
    }

    /// Hash del contenido (shape + bytes little-endian).
    pub fn content_hash(&self) -> String {
        let mut bytes = Vec::with_capacity(self.shape.len() * 8 + self.data.len() * 4);
        for d in &self.shape {
            bytes.extend_from_slice(&(*d as u64).to_le_bytes());
        }
        for v in &self.data {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        hash_bytes(&bytes)
    }

    pub fn size_bytes(&self) -> u64 {
        (self.data.len() * std::mem::size_of::<f32>() + self.shape.len() * std::mem::size_of::<usize>()) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(frames: usize, rows: usize, cols: usize) -> ArrayData {
        let data = (0..frames * rows * cols).map(|v| v as f32).collect();
        ArrayData::new(vec![frames, rows, cols], data).unwrap()
    }

    #[test]
    fn new_rejects_wrong_element_count() {
        assert!(matches!(ArrayData::new(vec![2, 2], vec![1.0; 3]), Err(StageError::ShapeMismatch(_))));
    }

    #[test]
    fn slice_then_concat_restores_original() {
        let a = stack(5, 2, 3);
        let parts = vec![a.slice_axis0(0..2).unwrap(), a.slice_axis0(2..3).unwrap(), a.slice_axis0(3..5).unwrap()];
        let back = ArrayData::concat_axis0(&parts).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn concat_rejects_mismatched_frames() {
        let parts = vec![stack(1, 2, 3), stack(1, 3, 2)];
        assert!(matches!(ArrayData::concat_axis0(&parts), Err(StageError::ShapeMismatch(_))));
    }

    #[test]
    fn slice_out_of_bounds_is_error() {
        assert!(stack(2, 1, 1).slice_axis0(1..3).is_err());
    }

    #[test]
    fn mean_axis0_averages_frames() {
        let a = ArrayData::new(vec![2, 1, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(a.mean_axis0().unwrap(), vec![2.0, 3.0]);
    }

    #[test]
    fn content_hash_depends_on_shape() {
        let a = ArrayData::new(vec![2, 2], vec![1.0; 4]).unwrap();
        let b = ArrayData::new(vec![4, 1], vec![1.0; 4]).unwrap();
        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash(), a.clone().content_hash());
    }
}

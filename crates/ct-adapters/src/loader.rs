//! Carga tolerante de frames desde disco.
//!
//! Un frame ilegible se registra y se omite; un formato no soportado o
//! frames con shapes distintas hacen fallar la carga completa.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ct_core::{ArrayData, RawInputs};
use fitrs::{Fits, FitsData, FitsDataArray};
use log::{error, info};
use rayon::prelude::*;
use thiserror::Error;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::ColorType;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unsupported frame format '{extension}' ({path})")]
    UnsupportedFormat { path: PathBuf, extension: String },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode {path}: {message}")]
    Decode { path: PathBuf, message: String },
    #[error("frame {path} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch { path: PathBuf, expected: Vec<usize>, found: Vec<usize> },
    #[error("no frame could be read out of {0} file(s)")]
    NoFrames(usize),
    #[error("worker pool: {0}")]
    Pool(String),
}

/// Decodificador de un frame 2D para un conjunto de extensiones.
pub trait FrameReader: Send + Sync {
    /// Extensiones aceptadas, en minúsculas y sin punto.
    fn extensions(&self) -> &[&'static str];

    fn read(&self, path: &Path) -> Result<ArrayData, LoadError>;

    fn accepts(&self, extension: &str) -> bool {
        self.extensions().iter().any(|e| e.eq_ignore_ascii_case(extension))
    }
}

/// Frames como matrices JSON anidadas (`[[f32; cols]; rows]`).
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFrameReader;

impl FrameReader for JsonFrameReader {
    fn extensions(&self) -> &[&'static str] {
        &["json"]
    }

    fn read(&self, path: &Path) -> Result<ArrayData, LoadError> {
        let file = File::open(path).map_err(|source| LoadError::Io { path: path.to_path_buf(),
                                                                     source })?;
        let rows: Vec<Vec<f32>> =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| LoadError::Decode { path: path.to_path_buf(),
                                                                                          message: e.to_string() })?;
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != cols) {
            return Err(LoadError::Decode { path: path.to_path_buf(),
                                           message: "rows have different lengths".into() });
        }
        let shape = vec![rows.len(), cols];
        ArrayData::new(shape, rows.concat()).map_err(|e| LoadError::Decode { path: path.to_path_buf(),
                                                                             message: e.to_string() })
    }
}

/// TIFF en escala de grises vía `tiff`. Las muestras (enteras o flotantes)
/// se convierten a f32 sin reescalar: se conservan las cuentas crudas.
#[derive(Debug, Default, Clone, Copy)]
pub struct TiffFrameReader;

impl FrameReader for TiffFrameReader {
    fn extensions(&self) -> &[&'static str] {
        &["tif", "tiff"]
    }

    fn read(&self, path: &Path) -> Result<ArrayData, LoadError> {
        let decode_err = |message: String| LoadError::Decode { path: path.to_path_buf(),
                                                               message };
        let file = File::open(path).map_err(|source| LoadError::Io { path: path.to_path_buf(),
                                                                     source })?;
        let mut decoder = Decoder::new(BufReader::new(file)).map_err(|e| decode_err(e.to_string()))?;
        let (width, height) = decoder.dimensions().map_err(|e| decode_err(e.to_string()))?;
        match decoder.colortype().map_err(|e| decode_err(e.to_string()))? {
            ColorType::Gray(_) => {}
            other => return Err(decode_err(format!("expected a grayscale frame, got {other:?}"))),
        }
        let data: Vec<f32> = match decoder.read_image().map_err(|e| decode_err(e.to_string()))? {
            DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
            DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
            DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
            DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
            DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::F32(v) => v,
            DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        };
        ArrayData::new(vec![height as usize, width as usize], data).map_err(|e| decode_err(e.to_string()))
    }
}

/// Imagen primaria de un FITS 2D vía `fitrs`. Píxeles enteros en blanco
/// (BLANK) quedan como NaN.
#[derive(Debug, Default, Clone, Copy)]
pub struct FitsFrameReader;

impl FrameReader for FitsFrameReader {
    fn extensions(&self) -> &[&'static str] {
        &["fits", "fit"]
    }

    fn read(&self, path: &Path) -> Result<ArrayData, LoadError> {
        let decode_err = |message: String| LoadError::Decode { path: path.to_path_buf(),
                                                               message };
        let fits = Fits::open(path).map_err(|e| decode_err(e.to_string()))?;
        let hdu = fits.get(0).ok_or_else(|| decode_err("missing primary HDU".into()))?;
        // NAXIS1 (columnas) primero y de variación más rápida
        let (axes, data): (Vec<usize>, Vec<f32>) = match hdu.read_data() {
            FitsData::FloatingPoint32(FitsDataArray { shape, data }) => (shape.clone(), data.iter().copied().collect()),
            FitsData::FloatingPoint64(FitsDataArray { shape, data }) => {
                (shape.clone(), data.iter().map(|x| *x as f32).collect())
            }
            FitsData::IntegersI32(FitsDataArray { shape, data }) => {
                (shape.clone(), data.iter().map(|x| x.map_or(f32::NAN, |v| v as f32)).collect())
            }
            FitsData::IntegersU32(FitsDataArray { shape, data }) => {
                (shape.clone(), data.iter().map(|x| x.map_or(f32::NAN, |v| v as f32)).collect())
            }
            _ => return Err(decode_err("primary HDU holds no numeric image".into())),
        };
        let shape = match axes.as_slice() {
            [cols, rows] => vec![*rows, *cols],
            [cols, rows, 1] => vec![*rows, *cols],
            other => return Err(decode_err(format!("expected a 2D image, got axes {other:?}"))),
        };
        ArrayData::new(shape, data).map_err(|e| decode_err(e.to_string()))
    }
}

/// PNG vía `image`, convertido a luminancia f32 en `[0, 1]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFrameReader;

impl FrameReader for ImageFrameReader {
    fn extensions(&self) -> &[&'static str] {
        &["png"]
    }

    fn read(&self, path: &Path) -> Result<ArrayData, LoadError> {
        let img = image::open(path).map_err(|e| LoadError::Decode { path: path.to_path_buf(),
                                                                    message: e.to_string() })?
                                   .to_luma32f();
        let shape = vec![img.height() as usize, img.width() as usize];
        ArrayData::new(shape, img.into_raw()).map_err(|e| LoadError::Decode { path: path.to_path_buf(),
                                                                              message: e.to_string() })
    }
}

/// Lectores soportados por defecto.
pub fn default_readers() -> Vec<Box<dyn FrameReader>> {
    vec![Box::new(TiffFrameReader),
         Box::new(FitsFrameReader),
         Box::new(ImageFrameReader),
         Box::new(JsonFrameReader)]
}

/// Lee un frame; si falla se registra el error y devuelve `None`.
pub fn forgiving_read(path: &Path, reader: &dyn FrameReader) -> Option<ArrayData> {
    match reader.read(path) {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!("cannot read {}, skipping: {e}", path.display());
            None
        }
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Carga `paths` como un stack `(n, rows, cols)` en el orden recibido.
///
/// Los formatos se validan antes de leer nada. La lectura corre sobre un pool
/// de `max_workers` hilos (0 = según CPUs).
pub fn load_images<P: AsRef<Path>>(paths: &[P],
                                   readers: &[Box<dyn FrameReader>],
                                   max_workers: usize)
                                   -> Result<ArrayData, LoadError> {
    let mut jobs = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let extension = extension_of(path);
        let reader = readers.iter()
                            .find(|r| r.accepts(&extension))
                            .ok_or_else(|| LoadError::UnsupportedFormat { path: path.to_path_buf(),
                                                                          extension: extension.clone() })?;
        jobs.push((path, reader.as_ref()));
    }

    let pool = rayon::ThreadPoolBuilder::new().num_threads(max_workers)
                                              .thread_name(|i| format!("ct-load-{i}"))
                                              .build()
                                              .map_err(|e| LoadError::Pool(e.to_string()))?;
    let frames: Vec<(&Path, Option<ArrayData>)> =
        pool.install(|| jobs.par_iter().map(|(path, reader)| (*path, forgiving_read(path, *reader))).collect());

    let mut expected: Option<Vec<usize>> = None;
    let mut data = Vec::new();
    let mut count = 0;
    for (path, frame) in frames {
        let Some(frame) = frame else { continue };
        match &expected {
            Some(shape) if *shape != frame.shape => {
                return Err(LoadError::ShapeMismatch { path: path.to_path_buf(),
                                                      expected: shape.clone(),
                                                      found: frame.shape });
            }
            Some(_) => {}
            None => expected = Some(frame.shape.clone()),
        }
        data.extend(frame.data);
        count += 1;
    }
    let Some(frame_shape) = expected else {
        return Err(LoadError::NoFrames(paths.len()));
    };
    info!("loaded {count}/{} frame(s) of shape {frame_shape:?}", paths.len());
    let mut shape = vec![count];
    shape.extend(frame_shape);
    ArrayData::new(shape, data).map_err(|e| LoadError::Decode { path: PathBuf::new(),
                                                                message: e.to_string() })
}

/// Arma los inputs crudos de una corrida CT.
pub fn ct_raw_inputs(projections: ArrayData, open_beam: ArrayData, dark_field: ArrayData) -> RawInputs {
    RawInputs::new().with("projections", projections)
                    .with("open_beam", open_beam)
                    .with("dark_field", dark_field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_case_insensitive() {
        assert!(TiffFrameReader.accepts("TIFF"));
        assert!(FitsFrameReader.accepts("Fit"));
        assert!(!ImageFrameReader.accepts("tif"));
        assert_eq!(extension_of(Path::new("a/b/frame_001.PNG")), "png");
        assert_eq!(extension_of(Path::new("noext")), "");
    }

    #[test]
    fn unsupported_format_fails_before_reading() {
        let err = load_images(&["missing_a.json", "frame.bmp"], &default_readers(), 2).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat { extension, .. } if extension == "bmp"));
    }

    #[test]
    fn raw_inputs_are_named() {
        let raw = ct_raw_inputs(ArrayData::zeros(vec![2, 2, 2]), ArrayData::zeros(vec![2, 2]), ArrayData::zeros(vec![2, 2]));
        let names: Vec<&str> = raw.names().collect();
        assert_eq!(names, vec!["projections", "open_beam", "dark_field"]);
    }
}

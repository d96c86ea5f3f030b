//! ct-adapters: stages de reconstrucción CT sobre `ct-core`.
//!
//! - `stages`: crop, normalize, gamma filter, ring removal, centro de
//!   rotación, FBP y máscara circular como `TypedStage`.
//! - `registries`: cadenas estándar y mínima listas para usar.
//! - `loader`: lectura tolerante de frames (JSON, TIFF, PNG).

pub mod binding;
pub mod loader;
pub mod registries;
pub mod stages;

pub use binding::StageBinding;
pub use loader::{ct_raw_inputs, default_readers, forgiving_read, load_images, FitsFrameReader, FrameReader,
                 ImageFrameReader, JsonFrameReader, LoadError, TiffFrameReader};
pub use registries::{minimal_registry, standard_registry, RECONSTRUCTION, VOLUME};

//! Constantes del motor core.
//!
//! Agrupa valores estáticos que participan en el cálculo de fingerprints y en
//! los defaults de planificación. `ENGINE_VERSION` forma parte del input del
//! hashing: cambiarlo invalida todas las entradas de cache existentes.

/// Versión lógica del motor. Se incluye en cada fingerprint de nodo para que un
/// cambio incompatible del engine recalcule determinísticamente los artifacts
/// aunque stages, parámetros y datos no cambien.
pub const ENGINE_VERSION: &str = "CT1.0";

/// Tamaño por defecto (en slices) de cada sub-rango en stages per-slice.
pub const DEFAULT_SLICE_CHUNK: usize = 16;

/// Presupuesto por defecto de la cache en memoria (1 GiB).
pub const DEFAULT_CACHE_BUDGET_BYTES: u64 = 1024 * 1024 * 1024;

/// Overhead fijo estimado por artifact (metadatos, nombre, fingerprint).
pub const ARTIFACT_OVERHEAD_BYTES: u64 = 256;

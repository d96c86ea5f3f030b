//! Configuración central de la aplicación.
//! Carga `.env` una sola vez y lee las variables `CTFLOW_*`.

use std::env;
use std::path::PathBuf;

use ct_core::{CacheConfig, SchedulerConfig};
use once_cell::sync::{Lazy, OnceCell};
use serde::Serialize;

use crate::errors::AppError;

static DOTENV: Lazy<()> = Lazy::new(|| {
    let _ = dotenvy::dotenv();
});

static GLOBAL: OnceCell<AppConfig> = OnceCell::new();

/// Configuración de una instalación de ctflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppConfig {
    /// Hilos del pool del scheduler (`CTFLOW_WORKERS`).
    pub workers: usize,
    /// Slices por tarea en stages per-slice (`CTFLOW_SLICE_CHUNK`).
    pub slice_chunk: usize,
    /// Presupuesto de la cache en MiB (`CTFLOW_CACHE_BUDGET_MB`).
    pub cache_budget_mb: u64,
    /// `CTFLOW_FAIL_FAST`.
    pub fail_fast: bool,
    /// Directorio de la cache persistente (`CTFLOW_CACHE_DIR`); sin valor la
    /// cache vive sólo en memoria.
    pub cache_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let scheduler = SchedulerConfig::default();
        Self { workers: scheduler.workers,
               slice_chunk: scheduler.slice_chunk,
               cache_budget_mb: CacheConfig::default().budget_bytes / (1024 * 1024),
               fail_fast: scheduler.fail_fast_default,
               cache_dir: None }
    }
}

impl AppConfig {
    /// Lee la configuración del entorno (cargando `.env` si existe).
    pub fn from_env() -> Result<Self, AppError> {
        Lazy::force(&DOTENV);
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
        where F: Fn(&str) -> Option<String>
    {
        let defaults = Self::default();
        let workers = parse_or(&lookup, "CTFLOW_WORKERS", defaults.workers)?;
        let slice_chunk = parse_or(&lookup, "CTFLOW_SLICE_CHUNK", defaults.slice_chunk)?;
        if workers == 0 || slice_chunk == 0 {
            return Err(AppError::Config("CTFLOW_WORKERS and CTFLOW_SLICE_CHUNK must be positive".into()));
        }
        let fail_fast = match lookup("CTFLOW_FAIL_FAST").as_deref().map(str::trim) {
            None | Some("") => defaults.fail_fast,
            Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            Some(other) => return Err(AppError::Config(format!("CTFLOW_FAIL_FAST={other} is not a boolean"))),
        };
        Ok(Self { workers,
                  slice_chunk,
                  cache_budget_mb: parse_or(&lookup, "CTFLOW_CACHE_BUDGET_MB", defaults.cache_budget_mb)?,
                  fail_fast,
                  cache_dir: lookup("CTFLOW_CACHE_DIR").filter(|v| !v.trim().is_empty()).map(PathBuf::from) })
    }

    /// Configuración de proceso: la primera carga exitosa queda fija.
    pub fn global() -> Result<&'static AppConfig, AppError> {
        GLOBAL.get_or_try_init(Self::from_env)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig { workers: self.workers,
                          slice_chunk: self.slice_chunk,
                          fail_fast_default: self.fail_fast }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig { budget_bytes: self.cache_budget_mb.saturating_mul(1024 * 1024) }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
    where T: std::str::FromStr,
          F: Fn(&str) -> Option<String>
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
               .parse()
               .map_err(|_| AppError::Config(format!("{key}={raw} is not a valid number")))
        }
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.cache_config(), CacheConfig::default());
    }

    #[test]
    fn variables_are_parsed() {
        let cfg = AppConfig::from_lookup(lookup(&[("CTFLOW_WORKERS", "3"),
                                                  ("CTFLOW_SLICE_CHUNK", " 8 "),
                                                  ("CTFLOW_CACHE_BUDGET_MB", "64"),
                                                  ("CTFLOW_FAIL_FAST", "true"),
                                                  ("CTFLOW_CACHE_DIR", "/tmp/ctflow")])).unwrap();
        assert_eq!(cfg.scheduler_config(),
                   SchedulerConfig { workers: 3,
                                     slice_chunk: 8,
                                     fail_fast_default: true });
        assert_eq!(cfg.cache_config().budget_bytes, 64 * 1024 * 1024);
        assert_eq!(cfg.cache_dir, Some(PathBuf::from("/tmp/ctflow")));
    }

    #[test]
    fn malformed_values_are_config_errors() {
        for vars in [[("CTFLOW_WORKERS", "many")], [("CTFLOW_WORKERS", "0")], [("CTFLOW_FAIL_FAST", "maybe")]] {
            let err = AppConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, AppError::Config(_)), "{vars:?}");
        }
    }
}

//! Persistencia opcional de entradas de cache: clave opaca -> bundle.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::debug;
use thiserror::Error;

use crate::model::ArtifactBundle;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid store key '{0}'")]
    InvalidKey(String),
}

/// Almacén clave -> bundle. Las claves son fingerprints de nodo; el
/// contenido es opaco para el almacén.
pub trait ArtifactStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<ArtifactBundle>, StoreError>;
    fn put(&self, key: &str, bundle: &ArtifactBundle) -> Result<(), StoreError>;
    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    inner: Mutex<HashMap<String, ArtifactBundle>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn get(&self, key: &str) -> Result<Option<ArtifactBundle>, StoreError> {
        Ok(self.inner.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned())
    }

    fn put(&self, key: &str, bundle: &ArtifactBundle) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), bundle.clone());
        Ok(())
    }
}

/// Un archivo JSON por clave dentro de `root`. La escritura pasa por un
/// archivo temporal + rename, así un lector nunca ve un bundle a medias.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

impl ArtifactStore for JsonDirStore {
    fn get(&self, key: &str) -> Result<Option<ArtifactBundle>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, bundle: &ArtifactBundle) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp = self.root.join(format!("{key}.json.tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, serde_json::to_vec(bundle)?)?;
        fs::rename(&tmp, &path)?;
        debug!("stored bundle {} at {}", key, path.display());
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.path_for(key)?.exists())
    }
}

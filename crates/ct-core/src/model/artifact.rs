//! Artifact: unidad de datos inmutable intercambiada entre stages.
//!
//! - `payload` es un arreglo, un escalar o JSON genérico; el motor no
//!   interpreta su semántica.
//! - `fingerprint` identifica al artifact: para datos crudos es el hash del
//!   contenido; para artifacts producidos se deriva del fingerprint del nodo
//!   (stage, params, inputs) y del nombre de salida.
//! - `metadata` permite anotar información auxiliar que no entra al hash.
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ArrayData;
use crate::constants::ARTIFACT_OVERHEAD_BYTES;
use crate::hashing::{hash_str, hash_value};

/// Tipos neutrales de artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Array,
    Scalar,
    GenericJson,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ArtifactPayload {
    Array(ArrayData),
    Scalar(f64),
    Json(Value),
}

impl ArtifactPayload {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            ArtifactPayload::Array(_) => ArtifactKind::Array,
            ArtifactPayload::Scalar(_) => ArtifactKind::Scalar,
            ArtifactPayload::Json(_) => ArtifactKind::GenericJson,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayData> {
        match self {
            ArtifactPayload::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<ArrayData> {
        match self {
            ArtifactPayload::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            ArtifactPayload::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn descriptor(&self) -> ArtifactDescriptor {
        match self {
            ArtifactPayload::Array(a) => ArtifactDescriptor { kind: ArtifactKind::Array,
                                                              shape: a.shape.clone(),
                                                              dtype: "f32".into() },
            ArtifactPayload::Scalar(_) => ArtifactDescriptor { kind: ArtifactKind::Scalar,
                                                               shape: vec![],
                                                               dtype: "f64".into() },
            ArtifactPayload::Json(_) => ArtifactDescriptor { kind: ArtifactKind::GenericJson,
                                                             shape: vec![],
                                                             dtype: "json".into() },
        }
    }

    /// Hash del contenido, independiente del nombre del artifact.
    pub fn content_hash(&self) -> String {
        match self {
            ArtifactPayload::Array(a) => a.content_hash(),
            ArtifactPayload::Scalar(v) => hash_str(&format!("scalar:{:016x}", v.to_bits())),
            ArtifactPayload::Json(v) => hash_value(v),
        }
    }

    pub fn size_bytes(&self) -> u64 {
        match self {
            ArtifactPayload::Array(a) => a.size_bytes(),
            ArtifactPayload::Scalar(_) => std::mem::size_of::<f64>() as u64,
            ArtifactPayload::Json(v) => v.to_string().len() as u64,
        }
    }
}

impl From<ArrayData> for ArtifactPayload {
    fn from(a: ArrayData) -> Self {
        ArtifactPayload::Array(a)
    }
}

impl From<f64> for ArtifactPayload {
    fn from(v: f64) -> Self {
        ArtifactPayload::Scalar(v)
    }
}

/// Shape/dtype de un artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub kind: ArtifactKind,
    pub shape: Vec<usize>,
    pub dtype: String,
}

/// Artifact inmutable producido/consumido por stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub descriptor: ArtifactDescriptor,
    pub fingerprint: String,
    pub producer: Option<String>, // None para datos crudos
    pub payload: ArtifactPayload,
    pub metadata: Option<Value>, // información auxiliar (no entra al hash)
}

pub type ArtifactRef = Arc<Artifact>;

impl Artifact {
    /// Artifact crudo (radiografías, open-beam, dark-field). El fingerprint es
    /// el hash de su contenido.
    pub fn raw(name: impl Into<String>, payload: impl Into<ArtifactPayload>) -> Self {
        let payload = payload.into();
        Self { name: name.into(),
               descriptor: payload.descriptor(),
               fingerprint: payload.content_hash(),
               producer: None,
               payload,
               metadata: None }
    }

    pub(crate) fn produced(name: &str, stage_id: &str, fingerprint: String, payload: ArtifactPayload) -> Self {
        Self { name: name.to_string(),
               descriptor: payload.descriptor(),
               fingerprint,
               producer: Some(stage_id.to_string()),
               payload,
               metadata: None }
    }

    /// Copia del artifact con otro payload (y mismo nombre); se usa para
    /// entregar sub-rangos a stages per-slice.
    pub(crate) fn with_payload(&self, payload: ArtifactPayload) -> Self {
        Self { name: self.name.clone(),
               descriptor: payload.descriptor(),
               fingerprint: self.fingerprint.clone(),
               producer: self.producer.clone(),
               payload,
               metadata: self.metadata.clone() }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_raw(&self) -> bool {
        self.producer.is_none()
    }

    pub fn array(&self) -> Option<&ArrayData> {
        self.payload.as_array()
    }

    pub fn scalar(&self) -> Option<f64> {
        self.payload.as_scalar()
    }

    pub fn shape(&self) -> &[usize] {
        &self.descriptor.shape
    }

    pub fn size_bytes(&self) -> u64 {
        self.payload.size_bytes() + ARTIFACT_OVERHEAD_BYTES
    }
}

/// Salidas de un nodo (en el orden declarado por el stage). Es la unidad que
/// almacena la cache: una entrada por fingerprint de nodo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactBundle {
    pub fingerprint: String,
    pub stage_id: String,
    pub artifacts: Vec<ArtifactRef>,
}

impl ArtifactBundle {
    pub fn get(&self, name: &str) -> Option<&ArtifactRef> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    pub fn size_bytes(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size_bytes()).sum()
    }
}

/// Datos crudos de entrada de una corrida (nombre -> artifact), en orden de
/// inserción.
#[derive(Debug, Clone, Default)]
pub struct RawInputs {
    inner: IndexMap<String, ArtifactRef>,
}

impl RawInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega (o reemplaza) un input crudo.
    pub fn insert(&mut self, name: impl Into<String>, payload: impl Into<ArtifactPayload>) -> &mut Self {
        let name = name.into();
        let art = Artifact::raw(name.clone(), payload);
        self.inner.insert(name, Arc::new(art));
        self
    }

    pub fn with(mut self, name: impl Into<String>, payload: impl Into<ArtifactPayload>) -> Self {
        self.insert(name, payload);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ArtifactRef> {
        self.inner.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inner.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

//! Cableado de un stage: id + nombres de artifacts de entrada/salida.
//!
//! Los stages CT traen un cableado por defecto (la cadena estándar) pero se
//! pueden registrar con otro id o leyendo otros artifacts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageBinding {
    pub id: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl StageBinding {
    pub fn new(id: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        Self { id: id.to_string(),
               inputs: inputs.iter().map(|s| s.to_string()).collect(),
               outputs: outputs.iter().map(|s| s.to_string()).collect() }
    }
}

use serde::Serialize;
use serde_json::Value;

use crate::constants::ENGINE_VERSION;
use crate::hashing::hash_value;

/// Insumos del fingerprint de un nodo. NO es el fingerprint final (string
/// hash) sino el modelo previo a canonicalizar.
///
/// `input_fingerprints` conserva el orden de los slots declarados por el
/// stage: dos inputs intercambiados producen un fingerprint distinto.
#[derive(Serialize)]
pub struct NodeFingerprintInput<'a> {
    pub engine_version: &'a str,
    pub stage_id: &'a str,
    pub stage_version: u32,
    pub params: &'a Value,
    pub input_fingerprints: &'a [String],
}

impl<'a> NodeFingerprintInput<'a> {
    pub fn new(stage_id: &'a str, stage_version: u32, params: &'a Value, input_fingerprints: &'a [String]) -> Self {
        Self { engine_version: ENGINE_VERSION,
               stage_id,
               stage_version,
               params,
               input_fingerprints }
    }

    pub fn fingerprint(&self) -> String {
        // Serializar un struct con campos String/Value no falla
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        hash_value(&value)
    }
}

/// Fingerprint de la salida `output` de un nodo.
pub fn output_fingerprint(node_fingerprint: &str, output: &str) -> String {
    hash_value(&serde_json::json!({ "node": node_fingerprint, "output": output }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_change_fingerprint() {
        let inputs = vec!["a".to_string()];
        let p1 = json!({"threshold": 1.5});
        let p2 = json!({"threshold": 2.0});
        let f1 = NodeFingerprintInput::new("filter", 1, &p1, &inputs).fingerprint();
        let f2 = NodeFingerprintInput::new("filter", 1, &p2, &inputs).fingerprint();
        assert_ne!(f1, f2);
        assert_eq!(f1, NodeFingerprintInput::new("filter", 1, &p1, &inputs).fingerprint());
    }

    #[test]
    fn input_order_matters() {
        let p = json!({});
        let ab = vec!["a".to_string(), "b".to_string()];
        let ba = vec!["b".to_string(), "a".to_string()];
        assert_ne!(NodeFingerprintInput::new("s", 1, &p, &ab).fingerprint(),
                   NodeFingerprintInput::new("s", 1, &p, &ba).fingerprint());
    }

    #[test]
    fn outputs_of_same_node_differ() {
        assert_ne!(output_fingerprint("n", "x"), output_fingerprint("n", "y"));
    }
}

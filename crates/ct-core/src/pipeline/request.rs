use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PipelineError;
use crate::params::merge_json;

/// Pedido de ejecución: artifacts deseados + overrides de parámetros por
/// stage. Se crea por invocación del pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub outputs: Vec<String>,
    #[serde(default)]
    pub overrides: BTreeMap<String, Value>,
    #[serde(default)]
    pub fail_fast: bool,
}

impl PipelineRequest {
    pub fn new<I, S>(outputs: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        Self { outputs: outputs.into_iter().map(Into::into).collect(),
               overrides: BTreeMap::new(),
               fail_fast: false }
    }

    /// Agrega overrides para `stage`; si ya existían se fusionan (las claves
    /// nuevas ganan).
    pub fn with_override(mut self, stage: &str, params: Value) -> Self {
        let merged = match self.overrides.get(stage) {
            Some(prev) => merge_json(prev, &params),
            None => params,
        };
        self.overrides.insert(stage.to_string(), merged);
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Outputs pedidos sin duplicados, en el orden original.
    pub fn requested_outputs(&self) -> Vec<&str> {
        let mut seen = Vec::with_capacity(self.outputs.len());
        for o in &self.outputs {
            if !seen.contains(&o.as_str()) {
                seen.push(o.as_str());
            }
        }
        seen
    }

    /// Validación estructural (independiente del registro).
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.outputs.is_empty() {
            return Err(PipelineError::InvalidRequest("request names no outputs".into()));
        }
        if self.outputs.iter().any(|o| o.trim().is_empty()) {
            return Err(PipelineError::InvalidRequest("output names must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overrides_accumulate() {
        let r = PipelineRequest::new(["volume"]).with_override("filter", json!({"threshold": 2.0}))
                                                .with_override("filter", json!({"kernel": 5}));
        assert_eq!(r.overrides["filter"], json!({"threshold": 2.0, "kernel": 5}));
    }

    #[test]
    fn duplicate_outputs_are_collapsed() {
        let r = PipelineRequest::new(["volume", "normalized", "volume"]);
        assert_eq!(r.requested_outputs(), vec!["volume", "normalized"]);
    }

    #[test]
    fn empty_request_is_invalid() {
        let r = PipelineRequest::new(Vec::<String>::new());
        assert!(matches!(r.validate(), Err(PipelineError::InvalidRequest(_))));
        assert!(PipelineRequest::new([" "]).validate().is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let r: PipelineRequest = serde_json::from_value(json!({"outputs": ["volume"]})).unwrap();
        assert!(!r.fail_fast);
        assert!(r.overrides.is_empty());
    }
}

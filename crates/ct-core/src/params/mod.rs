//! Resolución de parámetros: defaults del stage <- overrides del request.

pub mod merge;

pub use merge::merge_json;

use serde_json::Value;

use crate::stage::StageDefinition;

/// Resuelve los parámetros efectivos de `stage` aplicando `overrides`.
///
/// Rechaza overrides que no sean objeto, claves que no figuren en los
/// defaults del stage (opciones no reconocidas) y parámetros que el stage
/// mismo considere inválidos. El resultado es la forma canónica que
/// devuelve `StageDefinition::normalize_params`.
pub fn resolve_params(stage: &dyn StageDefinition, overrides: Option<&Value>) -> Result<Value, String> {
    let base = stage.base_params();
    let resolved = match overrides {
        None => base,
        Some(Value::Object(map)) => {
            if let Value::Object(defaults) = &base {
                let mut unknown: Vec<&str> = map.keys()
                                                .filter(|k| !defaults.contains_key(k.as_str()))
                                                .map(|k| k.as_str())
                                                .collect();
                if !unknown.is_empty() {
                    unknown.sort_unstable();
                    return Err(format!("unrecognized option(s) {:?} for stage '{}'", unknown, stage.id()));
                }
            }
            merge_json(&base, &Value::Object(map.clone()))
        }
        Some(other) => return Err(format!("overrides for stage '{}' must be an object, got {}", stage.id(), other)),
    };
    stage.normalize_params(&resolved)
         .map_err(|e| format!("invalid parameters for stage '{}': {e}", stage.id()))
}

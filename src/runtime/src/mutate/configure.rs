//! Configuration mode: defaults, overrides, schema and templated rules.

use std::collections::BTreeMap;

use a3s_ocm_core::error::{OcmError, Result};
use a3s_ocm_core::{ConfigRule, Configuration, Substitution};
use serde_json::{Map, Value};

use super::evaluator::Evaluator;

/// Key the rule list is placed under in the template document.
const ADJUSTMENTS_KEY: &str = "adjustments";

/// Merge caller values over `defaults`.
///
/// Only keys already present in `defaults` are overridden; other keys in
/// `values` are ignored.
pub fn merge_values(
    defaults: &BTreeMap<String, Value>,
    values: &BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    let mut merged = defaults.clone();
    for (key, value) in values {
        match merged.get_mut(key) {
            Some(slot) => *slot = value.clone(),
            None => tracing::debug!(key = %key, "Ignoring value without a default"),
        }
    }
    merged
}

/// Validate merged values against a JSON schema.
pub fn validate(schema: &Value, values: &BTreeMap<String, Value>) -> Result<()> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| OcmError::ValidationError(format!("Invalid configuration schema: {}", e)))?;
    let instance = Value::Object(values.clone().into_iter().collect());
    let violations: Vec<String> = validator
        .iter_errors(&instance)
        .map(|e| {
            let at = e.instance_path.to_string();
            if at.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", at, e)
            }
        })
        .collect();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(OcmError::ValidationError(format!(
            "Configuration values violate schema: {}",
            violations.join("; ")
        )))
    }
}

/// Compute the substitutions of a configuration section.
pub fn substitutions(
    configuration: &Configuration,
    values: &BTreeMap<String, Value>,
    evaluator: &dyn Evaluator,
) -> Result<Vec<Substitution>> {
    let merged = merge_values(&configuration.defaults, values);
    if let Some(schema) = &configuration.schema {
        validate(schema, &merged)?;
    }
    if configuration.rules.is_empty() {
        return Ok(Vec::new());
    }

    let template = template(&merged, &configuration.rules)?;
    let resolved = evaluator
        .evaluate(&template)
        .map_err(|e| locate_unresolved(e, &configuration.rules))?;

    let doc: Value = serde_yaml::from_slice(&resolved)?;
    let adjustments = doc
        .get(ADJUSTMENTS_KEY)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            OcmError::ValidationError("Evaluated template lost its rule list".to_string())
        })?;
    if adjustments.len() != configuration.rules.len() {
        return Err(OcmError::ValidationError(format!(
            "Evaluated template has {} rules, expected {}",
            adjustments.len(),
            configuration.rules.len()
        )));
    }

    let substitutions: Vec<Substitution> = configuration
        .rules
        .iter()
        .zip(adjustments)
        .map(|(rule, adjusted)| {
            let value = adjusted.get("value").cloned().unwrap_or(Value::Null);
            Substitution::new(rule.file.clone(), rule.path.clone(), value)
        })
        .collect();

    tracing::debug!(
        rules = substitutions.len(),
        values = merged.len(),
        "Computed configuration substitutions"
    );
    Ok(substitutions)
}

/// Template document: merged values at the root plus the rule list.
///
/// A value named like the rule list key would be overwritten, so it is
/// rejected.
fn template(merged: &BTreeMap<String, Value>, rules: &[ConfigRule]) -> Result<Vec<u8>> {
    if merged.contains_key(ADJUSTMENTS_KEY) {
        return Err(OcmError::ValidationError(format!(
            "Configuration value '{}' is reserved for the rule list",
            ADJUSTMENTS_KEY
        )));
    }
    let mut root: Map<String, Value> = merged.clone().into_iter().collect();
    root.insert(ADJUSTMENTS_KEY.to_string(), serde_json::to_value(rules)?);
    Ok(serde_yaml::to_string(&Value::Object(root))?.into_bytes())
}

/// Attach the rule's file and path to an unresolved reference raised
/// inside the rule list.
fn locate_unresolved(err: OcmError, rules: &[ConfigRule]) -> OcmError {
    match err {
        OcmError::UnresolvedReference {
            reference, path, ..
        } => match rule_index(&path).and_then(|i| rules.get(i)) {
            Some(rule) => OcmError::UnresolvedReference {
                reference,
                file: rule.file.clone(),
                path: rule.path.clone(),
            },
            None => OcmError::UnresolvedReference {
                reference,
                file: String::new(),
                path,
            },
        },
        other => other,
    }
}

/// Index `N` of a template path `adjustments[N]...`.
fn rule_index(path: &str) -> Option<usize> {
    let rest = path.strip_prefix(ADJUSTMENTS_KEY)?.strip_prefix('[')?;
    let end = rest.find(']')?;
    rest[..end].parse().ok()
}

//! Variable substitution engine
//!
//! Materializes `${...}` references inside step inputs at dispatch time.
//! Recognized forms:
//!   `${resources.<name>.<attribute>}` - attribute of an active resource
//!   `${steps.<stepName>.outputs.<key>}` - output of a prior step
//!   `${context.<key>}` - execution-wide context
//!
//! Substitution is strict: any unresolved reference fails the step before
//! dispatch.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use conductor_domain::{Resource, ResourceState};

static REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_.\-]+)\}").expect("valid regex"));

/// Substitution failures are fatal step-input errors.
#[derive(Debug, Error)]
pub enum SubstitutionError {
    #[error("unknown resource '{name}' in reference '${{{reference}}}'")]
    UnknownResource { name: String, reference: String },

    #[error("resource '{name}' is {state:?}, not active; reference '${{{reference}}}' cannot be resolved")]
    ResourceNotActive {
        name: String,
        state: ResourceState,
        reference: String,
    },

    #[error("resource '{name}' has no attribute '{attribute}'")]
    UnknownAttribute { name: String, attribute: String },

    #[error("no prior step '{step}' with output '{key}'")]
    UnknownStepOutput { step: String, key: String },

    #[error("unknown context key '{key}'")]
    UnknownContextKey { key: String },

    #[error("unrecognized reference form '${{{reference}}}'")]
    UnrecognizedForm { reference: String },
}

/// Values visible to substitution for one step dispatch.
pub struct SubstitutionScope<'a> {
    /// Resources of the application, keyed by logical name. Attribute
    /// references require the resource to be active.
    pub resources: &'a HashMap<String, Resource>,
    /// Outputs of prior steps, keyed by step name.
    pub step_outputs: &'a HashMap<String, BTreeMap<String, String>>,
    /// Execution-wide context (application name, environment, submitter).
    pub context: &'a BTreeMap<String, String>,
}

impl SubstitutionScope<'_> {
    fn resolve(&self, reference: &str) -> Result<String, SubstitutionError> {
        let parts: Vec<&str> = reference.split('.').collect();
        match parts.as_slice() {
            ["resources", name, attribute_parts @ ..] if !attribute_parts.is_empty() => {
                let attribute = attribute_parts.join(".");
                let resource = self.resources.get(*name).ok_or_else(|| {
                    SubstitutionError::UnknownResource {
                        name: (*name).to_string(),
                        reference: reference.to_string(),
                    }
                })?;
                if resource.state != ResourceState::Active {
                    return Err(SubstitutionError::ResourceNotActive {
                        name: (*name).to_string(),
                        state: resource.state,
                        reference: reference.to_string(),
                    });
                }
                resource.properties.get(&attribute).cloned().ok_or_else(|| {
                    SubstitutionError::UnknownAttribute {
                        name: (*name).to_string(),
                        attribute,
                    }
                })
            }
            ["steps", step, "outputs", key_parts @ ..] if !key_parts.is_empty() => {
                let key = key_parts.join(".");
                self.step_outputs
                    .get(*step)
                    .and_then(|outputs| outputs.get(&key))
                    .cloned()
                    .ok_or_else(|| SubstitutionError::UnknownStepOutput {
                        step: (*step).to_string(),
                        key,
                    })
            }
            ["context", key_parts @ ..] if !key_parts.is_empty() => {
                let key = key_parts.join(".");
                self.context
                    .get(&key)
                    .cloned()
                    .ok_or(SubstitutionError::UnknownContextKey { key })
            }
            _ => Err(SubstitutionError::UnrecognizedForm {
                reference: reference.to_string(),
            }),
        }
    }
}

/// Materialize every `${...}` reference in the given step inputs.
pub fn materialize_inputs(
    inputs: &BTreeMap<String, serde_json::Value>,
    scope: &SubstitutionScope<'_>,
) -> Result<BTreeMap<String, serde_json::Value>, SubstitutionError> {
    inputs
        .iter()
        .map(|(key, value)| Ok((key.clone(), materialize_value(value, scope)?)))
        .collect()
}

fn materialize_value(
    value: &serde_json::Value,
    scope: &SubstitutionScope<'_>,
) -> Result<serde_json::Value, SubstitutionError> {
    match value {
        serde_json::Value::String(text) => {
            Ok(serde_json::Value::String(materialize_text(text, scope)?))
        }
        serde_json::Value::Array(items) => Ok(serde_json::Value::Array(
            items
                .iter()
                .map(|item| materialize_value(item, scope))
                .collect::<Result<_, _>>()?,
        )),
        serde_json::Value::Object(map) => Ok(serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), materialize_value(v, scope)?)))
                .collect::<Result<_, _>>()?,
        )),
        other => Ok(other.clone()),
    }
}

fn materialize_text(
    text: &str,
    scope: &SubstitutionScope<'_>,
) -> Result<String, SubstitutionError> {
    let mut result = String::with_capacity(text.len());
    let mut cursor = 0;

    for capture in REFERENCE.captures_iter(text) {
        let whole = capture.get(0).expect("capture 0 always present");
        result.push_str(&text[cursor..whole.start()]);
        result.push_str(&scope.resolve(&capture[1])?);
        cursor = whole.end();
    }
    result.push_str(&text[cursor..]);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conductor_domain::ResourceId;

    fn active_resource(name: &str, properties: &[(&str, &str)]) -> Resource {
        Resource {
            id: ResourceId::new(),
            app_name: "billing".to_string(),
            name: name.to_string(),
            resource_type: "postgres".to_string(),
            state: ResourceState::Active,
            execution_id: None,
            properties: properties
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            fingerprint: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn scope_data() -> (
        HashMap<String, Resource>,
        HashMap<String, BTreeMap<String, String>>,
        BTreeMap<String, String>,
    ) {
        let resources = HashMap::from([(
            "app-db".to_string(),
            active_resource("app-db", &[("connection_string", "postgres://db:5432/app")]),
        )]);
        let step_outputs = HashMap::from([(
            "plan".to_string(),
            BTreeMap::from([("change_count".to_string(), "4".to_string())]),
        )]);
        let context = BTreeMap::from([
            ("app_name".to_string(), "billing".to_string()),
            ("environment".to_string(), "staging".to_string()),
        ]);
        (resources, step_outputs, context)
    }

    #[test]
    fn test_all_reference_forms() {
        let (resources, step_outputs, context) = scope_data();
        let scope = SubstitutionScope {
            resources: &resources,
            step_outputs: &step_outputs,
            context: &context,
        };

        let inputs = BTreeMap::from([
            (
                "db_url".to_string(),
                serde_json::json!("${resources.app-db.connection_string}"),
            ),
            (
                "summary".to_string(),
                serde_json::json!("${context.app_name}: ${steps.plan.outputs.change_count} changes"),
            ),
            ("count".to_string(), serde_json::json!(7)),
        ]);

        let materialized = materialize_inputs(&inputs, &scope).unwrap();
        assert_eq!(
            materialized["db_url"],
            serde_json::json!("postgres://db:5432/app")
        );
        assert_eq!(materialized["summary"], serde_json::json!("billing: 4 changes"));
        assert_eq!(materialized["count"], serde_json::json!(7));
    }

    #[test]
    fn test_nested_values_are_recursed() {
        let (resources, step_outputs, context) = scope_data();
        let scope = SubstitutionScope {
            resources: &resources,
            step_outputs: &step_outputs,
            context: &context,
        };

        let inputs = BTreeMap::from([(
            "env".to_string(),
            serde_json::json!({"vars": [{"name": "ENV", "value": "${context.environment}"}]}),
        )]);
        let materialized = materialize_inputs(&inputs, &scope).unwrap();
        assert_eq!(
            materialized["env"]["vars"][0]["value"],
            serde_json::json!("staging")
        );
    }

    #[test]
    fn test_inactive_resource_fails() {
        let (mut resources, step_outputs, context) = scope_data();
        resources.get_mut("app-db").unwrap().state = ResourceState::Provisioning;
        let scope = SubstitutionScope {
            resources: &resources,
            step_outputs: &step_outputs,
            context: &context,
        };

        let inputs = BTreeMap::from([(
            "db_url".to_string(),
            serde_json::json!("${resources.app-db.connection_string}"),
        )]);
        let err = materialize_inputs(&inputs, &scope).unwrap_err();
        assert!(matches!(err, SubstitutionError::ResourceNotActive { .. }));
    }

    #[test]
    fn test_unresolved_reference_is_fatal() {
        let (resources, step_outputs, context) = scope_data();
        let scope = SubstitutionScope {
            resources: &resources,
            step_outputs: &step_outputs,
            context: &context,
        };

        let inputs = BTreeMap::from([(
            "x".to_string(),
            serde_json::json!("${steps.missing.outputs.y}"),
        )]);
        let err = materialize_inputs(&inputs, &scope).unwrap_err();
        assert!(matches!(err, SubstitutionError::UnknownStepOutput { .. }));

        let inputs = BTreeMap::from([("x".to_string(), serde_json::json!("${bogus.form}"))]);
        let err = materialize_inputs(&inputs, &scope).unwrap_err();
        assert!(matches!(err, SubstitutionError::UnrecognizedForm { .. }));
    }

    #[test]
    fn test_text_without_references_unchanged() {
        let (resources, step_outputs, context) = scope_data();
        let scope = SubstitutionScope {
            resources: &resources,
            step_outputs: &step_outputs,
            context: &context,
        };
        let inputs = BTreeMap::from([("plain".to_string(), serde_json::json!("no refs here"))]);
        let materialized = materialize_inputs(&inputs, &scope).unwrap();
        assert_eq!(materialized["plain"], serde_json::json!("no refs here"));
    }
}

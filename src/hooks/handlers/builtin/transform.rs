//! Return value transformation aspect handler

use crate::hooks::{AspectError, AspectHandler, AspectInfo, BuiltInConfig, CallResult, HookResult};
use serde::Deserialize;
use serde_json::Value;

/// One step of the transformation pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Transform {
    /// Replace the value outright
    Set { value: Value },
    Uppercase {
        #[serde(default)]
        field: Option<String>,
    },
    Lowercase {
        #[serde(default)]
        field: Option<String>,
    },
    /// Surround a string with `prefix` and `suffix`
    Wrap {
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        suffix: String,
        #[serde(default)]
        field: Option<String>,
    },
    /// Append to a string or an array
    Append {
        value: Value,
        #[serde(default)]
        field: Option<String>,
    },
    Truncate {
        length: usize,
        #[serde(default)]
        field: Option<String>,
    },
    Redact {
        #[serde(default = "default_redaction")]
        replacement: String,
        #[serde(default)]
        field: Option<String>,
    },
    /// Shallow-merge an object into an object value
    Merge { data: serde_json::Map<String, Value> },
    RemoveField { field: String },
}

fn default_redaction() -> String {
    "***REDACTED***".to_string()
}

/// Built-in transform handler.
///
/// Rewrites the call's return value through a pipeline of transforms, configured either
/// as a `transforms` array or as a single `operation` with its parameters inline. With
/// `call_original = true` the original implementation runs first when nothing has
/// produced a return value yet, which makes the handler usable at the `instead` position.
pub struct TransformHandler {
    name: String,
    transforms: Vec<Transform>,
    call_original: bool,
}

impl TransformHandler {
    /// Create a new transform handler, rejecting malformed pipelines
    pub fn new(name: impl Into<String>, config: BuiltInConfig) -> HookResult<Self> {
        let name = name.into();
        let transforms = match (config.config.get("transforms"), config.get_str("operation")) {
            (Some(transforms), _) => serde_json::from_value::<Vec<Transform>>(transforms.clone())
                .map_err(|e| AspectError::invalid_config(format!("handler '{}': {}", name, e)))?,
            (None, Some(operation)) => {
                let mut step: serde_json::Map<String, Value> = config
                    .config
                    .iter()
                    .filter(|(key, _)| !matches!(key.as_str(), "operation" | "call_original"))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                step.insert("type".to_string(), Value::String(operation.to_string()));
                let transform = serde_json::from_value::<Transform>(Value::Object(step))
                    .map_err(|e| AspectError::invalid_config(format!("handler '{}': {}", name, e)))?;
                vec![transform]
            }
            (None, None) => Vec::new(),
        };

        Ok(Self {
            name,
            transforms,
            call_original: config.get_bool("call_original").unwrap_or(false),
        })
    }

    /// Apply transformations to data
    fn transform(&self, data: Value) -> Value {
        self.transforms
            .iter()
            .fold(data, |value, transform| apply(transform, value))
    }
}

fn apply(transform: &Transform, mut data: Value) -> Value {
    match transform {
        Transform::Set { value } => value.clone(),
        Transform::Uppercase { field } => map_string(data, field, |s| s.to_uppercase()),
        Transform::Lowercase { field } => map_string(data, field, |s| s.to_lowercase()),
        Transform::Wrap { prefix, suffix, field } => {
            map_string(data, field, |s| format!("{}{}{}", prefix, s, suffix))
        }
        Transform::Append { value, field } => {
            let target = match field {
                Some(field) => match data.get_mut(field.as_str()) {
                    Some(target) => target,
                    None => return data,
                },
                None => &mut data,
            };
            match (target, value) {
                (Value::String(s), Value::String(suffix)) => s.push_str(suffix),
                (Value::String(s), other) => s.push_str(&other.to_string()),
                (Value::Array(items), other) => items.push(other.clone()),
                _ => {}
            }
            data
        }
        Transform::Truncate { length, field } => map_string(data, field, |s| {
            if s.chars().count() > *length {
                s.chars().take(*length).collect()
            } else {
                s.to_string()
            }
        }),
        Transform::Redact { replacement, field } => match field {
            Some(field) => {
                if let Value::Object(ref mut map) = data {
                    if map.contains_key(field) {
                        map.insert(field.clone(), Value::String(replacement.clone()));
                    }
                }
                data
            }
            None => Value::String(replacement.clone()),
        },
        Transform::Merge { data: source } => {
            if let Value::Object(ref mut target) = data {
                for (key, value) in source {
                    target.insert(key.clone(), value.clone());
                }
            }
            data
        }
        Transform::RemoveField { field } => {
            if let Value::Object(ref mut map) = data {
                map.remove(field);
            }
            data
        }
    }
}

/// Rewrite a string value, or the string at `field` of an object value
fn map_string(mut data: Value, field: &Option<String>, f: impl Fn(&str) -> String) -> Value {
    let target = match field {
        Some(field) => data.get_mut(field.as_str()),
        None => Some(&mut data),
    };
    if let Some(Value::String(s)) = target {
        *s = f(s);
    }
    data
}

impl AspectHandler for TransformHandler {
    fn execute(&self, info: &AspectInfo<'_>) -> CallResult<()> {
        let current = match info.return_value() {
            Some(value) => value,
            None if self.call_original => info.invoke_original()?,
            None => Value::Null,
        };

        info.set_return_value(self.transform(current));
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::handlers::builtin::testing::{config_from_json, with_call};
    use serde_json::json;

    fn run(handler: &TransformHandler, initial: Option<Value>) -> Value {
        with_call(vec![json!("bob")], |info| {
            if let Some(value) = initial {
                info.set_return_value(value);
            }
            handler.execute(info).unwrap();
            info.return_value().unwrap()
        })
    }

    #[test]
    fn test_single_operation() {
        let config = config_from_json("transform", json!({ "operation": "uppercase" }));
        let handler = TransformHandler::new("shout", config).unwrap();

        assert_eq!(run(&handler, Some(json!("hello bob"))), json!("HELLO BOB"));
    }

    #[test]
    fn test_call_original_first() {
        let config = config_from_json("transform", json!({
            "operation": "wrap",
            "prefix": "<",
            "suffix": ">",
            "call_original": true,
        }));
        let handler = TransformHandler::new("wrap", config).unwrap();

        assert_eq!(run(&handler, None), json!("<hello bob>"));
    }

    #[test]
    fn test_without_original_value_is_null() {
        let config = config_from_json("transform", json!({ "operation": "lowercase" }));
        let handler = TransformHandler::new("quiet", config).unwrap();

        assert_eq!(run(&handler, None), Value::Null);
    }

    #[test]
    fn test_pipeline() {
        let config = config_from_json("transform", json!({
            "transforms": [
                { "type": "merge", "data": { "status": "ok", "secret": "s3cr3t" } },
                { "type": "redact", "field": "secret" },
                { "type": "append", "field": "tags", "value": "new" },
                { "type": "truncate", "field": "name", "length": 3 },
                { "type": "remove_field", "field": "drop" },
            ]
        }));
        let handler = TransformHandler::new("pipeline", config).unwrap();

        let result = run(
            &handler,
            Some(json!({ "name": "rexford", "tags": ["old"], "drop": true })),
        );
        assert_eq!(
            result,
            json!({
                "name": "rex",
                "tags": ["old", "new"],
                "status": "ok",
                "secret": "***REDACTED***",
            })
        );
    }

    #[test]
    fn test_set_and_append() {
        let config = config_from_json("transform", json!({
            "transforms": [
                { "type": "set", "value": "fixed" },
                { "type": "append", "value": "!" },
            ]
        }));
        let handler = TransformHandler::new("set", config).unwrap();

        assert_eq!(run(&handler, Some(json!("ignored"))), json!("fixed!"));
    }

    #[test]
    fn test_invalid_pipeline_rejected() {
        let config = config_from_json("transform", json!({ "operation": "explode" }));
        assert!(matches!(
            TransformHandler::new("bad", config),
            Err(AspectError::InvalidConfiguration(_))
        ));

        let config = config_from_json("transform", json!({ "transforms": [{ "type": "truncate" }] }));
        assert!(TransformHandler::new("bad", config).is_err());
    }
}

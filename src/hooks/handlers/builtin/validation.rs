//! Argument validation aspect handler

use crate::hooks::{
    AspectError, AspectHandler, AspectInfo, BuiltInConfig, CallResult, HandlerSignature,
    HookResult, ValueKind,
};
use anyhow::bail;
use regex::Regex;
use serde_json::Value;

/// Constraint on one argument (keyed by index) or on the return value (key `return`)
#[derive(Debug)]
struct Constraint {
    target: Target,
    min: Option<f64>,
    max: Option<f64>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<Regex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Argument(usize),
    Return,
}

impl Target {
    fn parse(key: &str) -> Option<Self> {
        if key == "return" {
            return Some(Self::Return);
        }
        key.parse().ok().map(Self::Argument)
    }

    fn label(&self) -> String {
        match self {
            Self::Argument(index) => format!("Argument {}", index),
            Self::Return => "Return value".to_string(),
        }
    }
}

/// Built-in validation handler.
///
/// Fails the call with a fault listing every violation. Declared `arg_kinds` also become
/// the handler's signature, so a mismatched member is rejected at registration.
pub struct ValidationHandler {
    name: String,
    min_args: Option<usize>,
    max_args: Option<usize>,
    arg_kinds: Vec<ValueKind>,
    constraints: Vec<Constraint>,
}

impl ValidationHandler {
    /// Create a new validation handler, compiling its patterns
    pub fn new(name: impl Into<String>, config: BuiltInConfig) -> HookResult<Self> {
        let name = name.into();
        let invalid = |message: String| AspectError::invalid_config(format!("handler '{}': {}", name, message));

        let exact = config.config.get("arg_count").and_then(|v| v.as_u64()).map(|n| n as usize);
        let min_args = config
            .config
            .get("min_args")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .or(exact);
        let max_args = config
            .config
            .get("max_args")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .or(exact);

        let mut arg_kinds = Vec::new();
        if let Some(kinds) = config.config.get("arg_kinds").and_then(|v| v.as_array()) {
            for kind in kinds {
                let kind_name = kind.as_str().unwrap_or_default();
                let parsed = ValueKind::from_name(kind_name)
                    .ok_or_else(|| invalid(format!("unknown value kind '{}'", kind_name)))?;
                arg_kinds.push(parsed);
            }
        }

        let mut constraints = Vec::new();
        if let Some(map) = config.config.get("constraints").and_then(|v| v.as_object()) {
            for (key, rule) in map {
                let target = Target::parse(key).ok_or_else(|| invalid(format!("bad constraint target '{}'", key)))?;
                let pattern = match rule.get("pattern").and_then(|v| v.as_str()) {
                    Some(pattern) => Some(
                        Regex::new(pattern).map_err(|e| invalid(format!("bad pattern '{}': {}", pattern, e)))?,
                    ),
                    None => None,
                };
                constraints.push(Constraint {
                    target,
                    min: rule.get("min").and_then(|v| v.as_f64()),
                    max: rule.get("max").and_then(|v| v.as_f64()),
                    min_length: rule.get("min_length").and_then(|v| v.as_u64()).map(|n| n as usize),
                    max_length: rule.get("max_length").and_then(|v| v.as_u64()).map(|n| n as usize),
                    pattern,
                });
            }
        }
        constraints.sort_by_key(|c| match c.target {
            Target::Argument(index) => (0, index),
            Target::Return => (1, 0),
        });

        Ok(Self {
            name,
            min_args,
            max_args,
            arg_kinds,
            constraints,
        })
    }

    /// Validate the call against the configured rules
    fn validate(&self, info: &AspectInfo<'_>) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let arguments = info.arguments();

        if let Some(min) = self.min_args {
            if arguments.len() < min {
                errors.push(format!("Expected at least {} arguments, got {}", min, arguments.len()));
            }
        }
        if let Some(max) = self.max_args {
            if arguments.len() > max {
                errors.push(format!("Expected at most {} arguments, got {}", max, arguments.len()));
            }
        }

        for (index, expected) in self.arg_kinds.iter().enumerate() {
            if let Some(value) = arguments.get(index) {
                let actual = ValueKind::of(value);
                if !expected.accepts(actual) {
                    errors.push(format!(
                        "Argument {} has wrong kind: expected {}, got {}",
                        index, expected, actual
                    ));
                }
            }
        }

        let return_value = info.return_value();
        for constraint in &self.constraints {
            let value = match constraint.target {
                Target::Argument(index) => arguments.get(index),
                Target::Return => return_value.as_ref(),
            };
            if let Some(value) = value {
                check_constraint(constraint, value, &mut errors);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check_constraint(constraint: &Constraint, value: &Value, errors: &mut Vec<String>) {
    let label = constraint.target.label();

    // Min/max for numbers
    if let Some(number) = value.as_f64() {
        if let Some(min) = constraint.min {
            if number < min {
                errors.push(format!("{} below minimum: {} < {}", label, number, min));
            }
        }
        if let Some(max) = constraint.max {
            if number > max {
                errors.push(format!("{} above maximum: {} > {}", label, number, max));
            }
        }
    }

    // Length constraints for strings and arrays
    let length = match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        _ => None,
    };
    if let Some(len) = length {
        if let Some(min_len) = constraint.min_length {
            if len < min_len {
                errors.push(format!("{} too short: {} < {}", label, len, min_len));
            }
        }
        if let Some(max_len) = constraint.max_length {
            if len > max_len {
                errors.push(format!("{} too long: {} > {}", label, len, max_len));
            }
        }
    }

    if let (Some(pattern), Some(text)) = (&constraint.pattern, value.as_str()) {
        if !pattern.is_match(text) {
            errors.push(format!("{} doesn't match pattern: {}", label, pattern.as_str()));
        }
    }
}

impl AspectHandler for ValidationHandler {
    fn execute(&self, info: &AspectInfo<'_>) -> CallResult<()> {
        if let Err(errors) = self.validate(info) {
            tracing::debug!(handler = %self.name, member = info.member(), errors = errors.len(), "Validation rejected call");
            bail!("Validation failed: {}", errors.join(", "));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> HandlerSignature {
        HandlerSignature::with_params(self.arg_kinds.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::handlers::builtin::testing::{config_from_json, with_call};
    use serde_json::json;

    #[test]
    fn test_arg_count() {
        let config = config_from_json("validation", json!({ "arg_count": 1 }));
        let handler = ValidationHandler::new("count", config).unwrap();

        assert!(with_call(vec![json!("bob")], |info| handler.execute(info)).is_ok());

        let err = with_call(Vec::new(), |info| handler.execute(info)).unwrap_err();
        assert_eq!(err.to_string(), "Validation failed: Expected at least 1 arguments, got 0");
    }

    #[test]
    fn test_arg_kinds_and_signature() {
        let config = config_from_json("validation", json!({ "arg_kinds": ["string"] }));
        let handler = ValidationHandler::new("kinds", config).unwrap();

        assert_eq!(handler.signature().params, vec![ValueKind::String]);
        assert!(with_call(vec![json!("bob")], |info| handler.execute(info)).is_ok());

        let err = with_call(vec![json!(7)], |info| handler.execute(info)).unwrap_err();
        assert!(err.to_string().contains("expected string, got number"));
    }

    #[test]
    fn test_constraints() {
        let config = config_from_json("validation", json!({
            "constraints": {
                "0": { "min_length": 2, "max_length": 5, "pattern": "^[a-z]+$" },
                "1": { "min": 0, "max": 10 },
            }
        }));
        let handler = ValidationHandler::new("constraints", config).unwrap();

        assert!(with_call(vec![json!("bob"), json!(3)], |info| handler.execute(info)).is_ok());

        let err = with_call(vec![json!("Bobby-Tables"), json!(11)], |info| handler.execute(info))
            .unwrap_err()
            .to_string();
        assert!(err.contains("Argument 0 too long: 12 > 5"));
        assert!(err.contains("Argument 0 doesn't match pattern"));
        assert!(err.contains("Argument 1 above maximum: 11 > 10"));
    }

    #[test]
    fn test_return_constraint() {
        let config = config_from_json("validation", json!({
            "constraints": { "return": { "pattern": "^hello" } }
        }));
        let handler = ValidationHandler::new("returns", config).unwrap();

        let ok = with_call(vec![json!("bob")], |info| {
            info.invoke_original()?;
            handler.execute(info)
        });
        assert!(ok.is_ok());

        let err = with_call(vec![json!("bob")], |info| {
            info.set_return_value(json!("goodbye"));
            handler.execute(info)
        });
        assert!(err.is_err());
    }

    #[test]
    fn test_invalid_config() {
        let config = config_from_json("validation", json!({
            "constraints": { "0": { "pattern": "([" } }
        }));
        assert!(matches!(
            ValidationHandler::new("bad", config),
            Err(AspectError::InvalidConfiguration(_))
        ));

        let config = config_from_json("validation", json!({ "arg_kinds": ["widget"] }));
        assert!(ValidationHandler::new("bad", config).is_err());

        let config = config_from_json("validation", json!({ "constraints": { "first": {} } }));
        assert!(ValidationHandler::new("bad", config).is_err());
    }
}
